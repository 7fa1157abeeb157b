mod commands;
mod terminal;

use commands::{CommandLine, Commands, probe, ranges};
use terminal::{print, spinner};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let commands = CommandLine::parse_args();

    spinner::init_logging(commands.verbose);
    print::banner();

    let result = match commands.command {
        Commands::Probe {
            cidrs,
            ranges_file,
            options,
        } => {
            let cfg = options.to_config(commands.verbose);
            probe::probe(cidrs, ranges_file, &cfg).await
        }
        Commands::Ranges { ranges_file } => ranges::ranges(ranges_file).await,
    };

    print::end_of_program();
    result
}
