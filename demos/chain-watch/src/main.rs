use std::path::Path;

use beamlink::config::Config;
use beamlink::ChainClient;
use clap::Parser;
use tokio::task::spawn_blocking;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    #[arg(short, long)]
    config: String,
    #[arg(short, long)]
    network: Option<String>,
    #[arg(short, long)]
    logfile: Option<String>,
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    if let Some(path) = args.logfile {
        let p = Path::new(&path);
        std::fs::create_dir_all(p.parent().unwrap()).unwrap();
        let logfile = std::fs::OpenOptions::new()
            .write(true)
            .create(true)
            .open(p)
            .expect("log file to open successfully");
        let subscriber = tracing_subscriber::fmt::Subscriber::builder()
            .with_writer(logfile)
            .with_env_filter(EnvFilter::from_default_env())
            .finish();
        tracing::subscriber::set_global_default(subscriber).unwrap();
    } else {
        tracing_subscriber::fmt()
            .pretty()
            .with_env_filter(EnvFilter::from_default_env())
            .init();
    }

    let config = Config::load_from_path(&args.config).expect("config to load");
    let client = match &args.network {
        Some(network) => ChainClient::for_network(&config, network),
        None => ChainClient::new(&config),
    }
    .expect("network to be configured");

    user_loop(client).await;
}

async fn user_loop(client: ChainClient) {
    loop {
        println!("(q) to quit, (c) to connect, (s) for status, (g) for genesis hash");

        let command_task = spawn_blocking(|| {
            let mut input = String::new();
            std::io::stdin()
                .read_line(&mut input)
                .expect("read line to succeed");
            input
        });

        match command_task.await.unwrap().trim() {
            "q" => {
                return;
            }
            "c" => match client.connect().await {
                Ok(()) => println!("connected to {}", client.network()),
                Err(err) => println!("connection failed: {err}"),
            },
            "s" => {
                print_status(&client).await;
            }
            "g" => match client.genesis_hash().await {
                Ok(hash) => println!("genesis hash: {hash}"),
                Err(err) => println!("request failed: {err}"),
            },
            _ => {
                println!("Unrecognised command");
            }
        }
    }
}

async fn print_status(client: &ChainClient) {
    let status = client.status().await;
    println!("endpoint:    {}", status.endpoint);
    println!("state:       {}", status.state);
    println!("retry count: {}", status.retry_count);
    if let Some(error) = status.last_error {
        println!("last error:  {error}");
    }
}
