use std::path::PathBuf;

use clap::{Args, Subcommand, ValueEnum};
use coapline_message::Code;
use coapline_transport::Network;

use crate::exit::CliResult;
use crate::output::OutputFormat;

pub mod send;
pub mod serve;
pub mod version;

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run an echo server.
    Serve(ServeArgs),
    /// Send a single request and print the response.
    Send(SendArgs),
    /// Show version information.
    Version(VersionArgs),
}

pub async fn run(command: Command, format: OutputFormat) -> CliResult<i32> {
    match command {
        Command::Serve(args) => serve::run(args, format).await,
        Command::Send(args) => send::run(args, format).await,
        Command::Version(args) => version::run(args),
    }
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, ValueEnum)]
pub enum NetworkArg {
    #[default]
    Udp,
    Tcp,
}

impl From<NetworkArg> for Network {
    fn from(arg: NetworkArg) -> Self {
        match arg {
            NetworkArg::Udp => Network::Udp,
            NetworkArg::Tcp => Network::Tcp,
        }
    }
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, ValueEnum)]
pub enum Method {
    #[default]
    Get,
    Post,
    Put,
    Delete,
}

impl From<Method> for Code {
    fn from(method: Method) -> Self {
        match method {
            Method::Get => Code::GET,
            Method::Post => Code::POST,
            Method::Put => Code::PUT,
            Method::Delete => Code::DELETE,
        }
    }
}

#[derive(Args, Debug)]
pub struct ServeArgs {
    /// Address to bind (e.g. 0.0.0.0:5683).
    pub addr: String,
    /// Transport to serve on.
    #[arg(long, value_enum, default_value_t = NetworkArg::Udp)]
    pub network: NetworkArg,
    /// Path patterns to echo on (repeatable). A trailing `/` matches a
    /// subtree. Default: every path.
    #[arg(long = "route", value_name = "PATTERN")]
    pub routes: Vec<String>,
}

#[derive(Args, Debug)]
pub struct SendArgs {
    /// Server address (e.g. 127.0.0.1:5683).
    pub addr: String,
    /// Transport to use.
    #[arg(long, value_enum, default_value_t = NetworkArg::Udp)]
    pub network: NetworkArg,
    /// Request method.
    #[arg(long, value_enum, default_value_t = Method::Get)]
    pub method: Method,
    /// Request path (e.g. /sensors/temp).
    #[arg(long, default_value = "/")]
    pub path: String,
    /// Raw string payload.
    #[arg(long, conflicts_with = "file")]
    pub data: Option<String>,
    /// Read payload from file.
    #[arg(long, conflicts_with = "data")]
    pub file: Option<PathBuf>,
    /// Content-Format option value (e.g. 0 text/plain, 50 application/json).
    #[arg(long, value_name = "N")]
    pub content_format: Option<u16>,
    /// Send as non-confirmable; no response is awaited.
    #[arg(long)]
    pub non: bool,
    /// Token as hex (up to 8 bytes). Default: random.
    #[arg(long, value_name = "HEX")]
    pub token: Option<String>,
    /// Initial acknowledgement timeout (e.g. 2s, 500ms).
    #[arg(long, env = "COAPLINE_ACK_TIMEOUT", default_value = "2s")]
    pub ack_timeout: String,
    /// Retransmissions before giving up.
    #[arg(long, env = "COAPLINE_MAX_RETRANSMIT", default_value_t = 4)]
    pub max_retransmit: u32,
}

#[derive(Args, Debug)]
pub struct VersionArgs {
    /// Show extended build provenance.
    #[arg(long)]
    pub extended: bool,
}
