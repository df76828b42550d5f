use clap::Parser;

#[derive(Parser, Debug)]
#[clap(name = "pushmux", version, about = "pushmux Command Line Utility")]
pub struct Cli {
  #[clap(subcommand)]
  pub command: Commands,
}

#[derive(clap::Subcommand, Debug)]
pub enum Commands {
  /// Run the demo server: echoes `X` as `~X` and pushes `HI` periodically
  Serve(ServeArgs),
  /// Run the demo client: sends `OHAI` periodically and prints pushes
  Dial(DialArgs),
}

#[derive(Parser, Debug)]
pub struct ServeArgs {
  /// Endpoint to listen on (e.g. "tcp://0.0.0.0:9000", ":9000", "ipc:///tmp/pushmux.sock")
  #[clap(long, short, default_value = ":9000")]
  pub addr: String,

  /// Seconds between `HI` pushes to every connected client
  #[clap(long, default_value_t = 10)]
  pub push_every: u64,
}

#[derive(Parser, Debug)]
pub struct DialArgs {
  /// Endpoint to connect to
  #[clap(long, short, default_value = "localhost:9000")]
  pub addr: String,

  /// Seconds between `OHAI` commands
  #[clap(long, default_value_t = 5)]
  pub cmd_every: u64,

  /// Stop after this many commands (runs until the server goes away if unset)
  #[clap(long)]
  pub count: Option<u64>,

  /// Dial again after the server closes the connection
  #[clap(long, short, action)]
  pub reconnect: bool,
}
