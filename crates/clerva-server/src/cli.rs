use clap::Parser;

#[derive(Parser, Debug)]
#[command(name = "clerva-server", about = "Clerva presence service")]
pub struct Args {
    /// Path to the TOML config file.
    #[arg(short, long, default_value = "clerva.toml")]
    pub config: String,
}
