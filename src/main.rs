use std::process::Command;

use anyhow::{Context, Result};
use clap::Parser;
use log::LevelFilter;
use tokio::net::TcpListener;

use layerlens::error;
use layerlens::sources::{self, Engine, Platform};
use layerlens::{analyze, ExtractedImage, Image, ServerState};

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[arg(help = "Image reference (e.g. nginx:latest) or path to an image tarball")]
    image: String,

    #[arg(short, long, default_value_t = 8080, help = "Port to listen on")]
    port: u16,

    #[arg(
        long,
        default_value = "",
        help = "Target platform as os/arch (default: linux on the host architecture)"
    )]
    platform: String,

    #[arg(
        short,
        long,
        value_enum,
        default_value = "auto",
        help = "How to acquire the image"
    )]
    engine: Engine,

    #[arg(long, help = "Don't open the browser automatically")]
    no_open: bool,

    #[arg(
        short,
        long,
        action = clap::ArgAction::Count,
        help = "Verbose mode (-v for debug, -vv for trace)"
    )]
    verbose: u8,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let platform = sources::parse_platform(&cli.platform)?;
    let state = ServerState::new(cli.image.clone());

    // Load and analyze in the background; requests observe the handoff state
    {
        let state = state.clone();
        let reference = cli.image.clone();
        let engine = cli.engine;
        let platform = platform.clone();
        std::thread::spawn(move || match load_and_analyze(engine, &reference, &platform) {
            Ok(image) => {
                log::info!("analyzed {} layers of {reference}", image.info().layer_count);
                state.set_image(image);
            }
            Err(e) => {
                log::error!("analysis failed: {e}");
                state.set_error(e.to_string());
            }
        });
    }

    let rt = tokio::runtime::Runtime::new().context("Failed to create async runtime")?;
    rt.block_on(async move {
        let listener = match TcpListener::bind(("127.0.0.1", cli.port)).await {
            Ok(listener) => listener,
            Err(e) => {
                log::warn!("port {} unavailable ({e}), picking a free one", cli.port);
                TcpListener::bind(("127.0.0.1", 0))
                    .await
                    .context("Failed to bind a listen port")?
            }
        };
        let url = format!("http://localhost:{}", listener.local_addr()?.port());
        log::info!("listening on {url}");

        if !cli.no_open {
            open_browser(&url);
        }

        layerlens::server::serve(listener, state).await
    })
}

fn load_and_analyze(
    engine: Engine,
    reference: &str,
    platform: &Platform,
) -> error::Result<Image> {
    let (tarball_path, _temp_dir) = sources::fetch_image_tarball(engine, reference, platform)?;
    let extracted = ExtractedImage::from_tarball(&tarball_path)?;
    analyze(extracted, reference)
}

fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => LevelFilter::Info,
        1 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    };
    env_logger::Builder::from_env(env_logger::Env::default())
        .filter_level(level)
        .init();
}

fn open_browser(url: &str) {
    let launcher = match std::env::consts::OS {
        "macos" => "open",
        "linux" => "xdg-open",
        _ => return,
    };
    if let Err(e) = Command::new(launcher).arg(url).spawn() {
        log::debug!("could not open browser: {e}");
    }
}
