use serde_json::Value;

use lumen_providers::chat::{system_message, user_message};

pub const NO_CONTEXT_REQUIRED: &str = "For this question no context is required";
pub const NO_CONTEXT_FOUND: &str = "There is no context for this question";
pub const CONTEXT_PREFIX: &str = "These are the documents for context: ";
pub const HISTORY_PREFIX: &str = "For reference, here is previous chat history: ";

const CLASSIFIER_INSTRUCTIONS: &str = "Your purpose is to decide if the question needs context. \
Questions that need context are often asking for a specific answer about people, places, names, \
contacts, locations, or purpose. Simply state this question needs context or this question \
doesn't need context.";
const CLASSIFIER_EXAMPLES: &str = "Here is an example of conversations:\n\
Question: What is the email of a.i. solutions\n\
Answer: This question needs context\n\
Question: hello\n\
Answer: this question does not need context";
const GENERATION_EXAMPLES: &str = "Examples of conversations:\n\
Question: what is the email of x company\n\
Thought: To find the email it will be under the contact email section, x@gmail.com\n\
Answer: the company email is x@gmail.com\n\n\
Question: What are companies that specialize in y activity\n\
Thought: Gather all the companies that do y activity. Then list them off. What the companies do \
is attached to the What We Do SPECIALIZATION TAGS column.\n\
Answer: the companies that specialize in y are a, b, c";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContextVerdict {
	NeedsContext,
	NoContextNeeded,
}
impl ContextVerdict {
	/// Maps a free-text classifier reply onto a verdict.
	///
	/// Only the exact, case-sensitive phrases "doesn't need context" and "does not need context"
	/// mean no retrieval. Anything else, including an empty reply, asks for context.
	pub fn from_model_text(text: &str) -> Self {
		if text.contains("doesn't need context") || text.contains("does not need context") {
			Self::NoContextNeeded
		} else {
			Self::NeedsContext
		}
	}

	pub fn needs_context(self) -> bool {
		matches!(self, Self::NeedsContext)
	}
}

/// Everything the generation capability sees for one question.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenerationPrompt {
	pub purpose: String,
	pub context: String,
	pub history: String,
	pub question: String,
}
impl GenerationPrompt {
	pub fn messages(&self) -> Vec<Value> {
		let mut messages = vec![
			system_message(&self.purpose),
			system_message(GENERATION_EXAMPLES),
			system_message(&self.context),
		];

		if !self.history.is_empty() {
			messages.push(system_message(&format!("{HISTORY_PREFIX}{}", self.history)));
		}

		messages.push(user_message(&self.question));

		messages
	}
}

pub fn classifier_messages(question: &str) -> Vec<Value> {
	vec![
		system_message(CLASSIFIER_INSTRUCTIONS),
		system_message(CLASSIFIER_EXAMPLES),
		user_message(question),
	]
}

/// Renders prior turns as `Question: q\nAnswer: a\n\n` blocks, oldest first.
pub fn render_history<'a, I>(turns: I) -> String
where
	I: IntoIterator<Item = (&'a str, &'a str)>,
{
	let mut out = String::new();

	for (question, answer) in turns {
		out.push_str("Question: ");
		out.push_str(question);
		out.push_str("\nAnswer: ");
		out.push_str(answer);
		out.push_str("\n\n");
	}

	out
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn negative_phrases_skip_retrieval() {
		assert_eq!(
			ContextVerdict::from_model_text("this question does not need context"),
			ContextVerdict::NoContextNeeded
		);
		assert_eq!(
			ContextVerdict::from_model_text("This question doesn't need context."),
			ContextVerdict::NoContextNeeded
		);
	}

	#[test]
	fn anything_else_needs_context() {
		assert_eq!(
			ContextVerdict::from_model_text("This question needs context"),
			ContextVerdict::NeedsContext
		);
		// Matching is case-sensitive.
		assert_eq!(
			ContextVerdict::from_model_text("This question DOES NOT NEED CONTEXT"),
			ContextVerdict::NeedsContext
		);
		assert_eq!(ContextVerdict::from_model_text(""), ContextVerdict::NeedsContext);
	}

	#[test]
	fn history_renders_in_order() {
		let rendered = render_history([("hi", "hello"), ("email?", "a@acme.com")]);

		assert_eq!(rendered, "Question: hi\nAnswer: hello\n\nQuestion: email?\nAnswer: a@acme.com\n\n");
		assert_eq!(render_history(Vec::<(&str, &str)>::new()), "");
	}

	#[test]
	fn history_message_only_when_present() {
		let mut prompt = GenerationPrompt {
			purpose: "You answer questions about Acme.".to_string(),
			context: NO_CONTEXT_REQUIRED.to_string(),
			history: String::new(),
			question: "hello".to_string(),
		};

		assert_eq!(prompt.messages().len(), 4);

		prompt.history = render_history([("hi", "hello")]);

		let messages = prompt.messages();

		assert_eq!(messages.len(), 5);
		assert_eq!(messages[2]["content"], NO_CONTEXT_REQUIRED);
		assert!(messages[3]["content"].as_str().is_some_and(|text| text.starts_with(HISTORY_PREFIX)));
		assert_eq!(messages[4]["role"], "user");
		assert_eq!(messages[4]["content"], "hello");
	}
}
