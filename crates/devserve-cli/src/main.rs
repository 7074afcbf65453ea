use clap::Parser;
use devserve_cli::{cli, commands, error, logger};
use miette::Result;

#[tokio::main]
async fn main() -> Result<()> {
    let args = cli::Cli::parse();

    logger::init_logger(args.log_level.unwrap_or_default(), args.no_color);

    commands::execute(args)
        .await
        .map_err(error::cli_error_to_miette)
}
