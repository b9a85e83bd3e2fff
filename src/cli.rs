use anyhow::Result;
use clap::Parser;
use std::env::current_dir;
use std::net::SocketAddr;
use std::path::PathBuf;

#[derive(Parser, Debug)]
pub struct Opts {
    /// The address to listen on for the HTTP API and websocket gateway.
    #[clap(long, default_value = "0.0.0.0:8000")]
    pub http_address: SocketAddr,

    /// Where to permanently store data, defaults to the current working directory.
    #[clap(long)]
    data_dir: Option<PathBuf>,

    /// If enabled logs will be in json format.
    #[clap(short, long)]
    pub json: bool,

    /// Number of worker threads available to mine proof-of-work concurrently.
    #[clap(long, default_value_t = 4)]
    pub max_pow_threads: usize,

    /// Per-connection cap on the number of subscribed addresses.
    #[clap(long, default_value_t = 40)]
    pub ws_max_subs_addrs_conn: usize,

    /// Per-connection cap on subscribed addresses that have no known outputs.
    #[clap(long, default_value_t = 20)]
    pub ws_max_subs_addrs_empty: usize,

    /// UID of the native token, used to extract the right balance record on
    /// `wallet:balance_updated` events.
    #[clap(long, default_value = "00")]
    pub hathor_token_uid: String,
}

impl Opts {
    pub fn read() -> Opts {
        Opts::parse()
    }

    pub fn data_dir(&self) -> Result<PathBuf> {
        let data_dir = match self.data_dir.clone() {
            None => current_dir()?.join("data"),
            Some(path) => path,
        }
        .join("node");

        Ok(data_dir)
    }
}
