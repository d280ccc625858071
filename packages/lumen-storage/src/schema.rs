pub fn render_schema() -> String {
	let init = include_str!("../../../sql/init.sql");

	expand_includes(init)
}

fn expand_includes(sql: &str) -> String {
	let mut out = String::new();

	for line in sql.lines() {
		let trimmed = line.trim();

		if let Some(path) = trimmed.strip_prefix("\\ir ") {
			match path.trim() {
				"tables/001_chat_turns.sql" =>
					out.push_str(include_str!("../../../sql/tables/001_chat_turns.sql")),
				"tables/002_knowledge_fragments.sql" =>
					out.push_str(include_str!("../../../sql/tables/002_knowledge_fragments.sql")),
				"tables/003_metric_spans.sql" =>
					out.push_str(include_str!("../../../sql/tables/003_metric_spans.sql")),
				"tables/004_feedback.sql" =>
					out.push_str(include_str!("../../../sql/tables/004_feedback.sql")),
				_ => out.push_str(line),
			}
		} else {
			out.push_str(line);
		}

		out.push('\n');
	}

	out
}
