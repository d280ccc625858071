use clap::Parser;

#[tokio::main]
async fn main() -> color_eyre::Result<()> {
	color_eyre::install()?;

	let args = lumen_worker::Args::parse();

	lumen_worker::run(args).await
}
