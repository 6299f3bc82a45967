use std::io::Write;
use std::path::PathBuf;

use anyhow::Context;
use base64::Engine as Base64Engine;
use clap::{Parser, Subcommand};

use badgeserver::{BadgeRequest, BadgeService, OutputFormat, RasterBackend, ServiceConfig};

#[derive(Parser)]
#[command(name = "badgeserver", version, about = "Render status badges as SVG or PNG")]
struct Cli {
    /// JSON configuration file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Cmd>,
}

#[derive(Subcommand)]
enum Cmd {
    /// Serve badges over HTTP
    Serve {
        /// Host to bind
        #[arg(long)]
        listen: Option<String>,
        /// Port to bind
        #[arg(long)]
        port: Option<u16>,
        /// Request worker threads (0 = one per CPU)
        #[arg(long)]
        workers: Option<usize>,
    },
    /// Render a single badge
    Render {
        #[arg(long, default_value = "badgeserver")]
        vendor: String,
        #[arg(long, default_value = "okay")]
        status: String,
        #[arg(long, default_value = "lightgray")]
        color: String,
        /// Vendor box width (-1 = auto)
        #[arg(long, allow_hyphen_values = true)]
        vendor_width: Option<i64>,
        /// Status box width (-1 = auto)
        #[arg(long, allow_hyphen_values = true)]
        status_width: Option<i64>,
        /// svg or png
        #[arg(long, default_value = "svg")]
        format: String,
        /// default, inkscape, or imagemagick
        #[arg(long, default_value = "")]
        converter: String,
        /// Output file (stdout when omitted)
        #[arg(short, long)]
        output: Option<PathBuf>,
        /// Print a base64 data: URI instead of raw bytes
        #[arg(long)]
        data_uri: bool,
    },
    /// List the template's colors
    Colors {
        /// Include the reserved neutral color
        #[arg(long)]
        all: bool,
        /// Print as a JSON array
        #[arg(long)]
        json: bool,
    },
}

fn load_config(path: Option<&PathBuf>) -> anyhow::Result<ServiceConfig> {
    match path {
        Some(p) => ServiceConfig::from_file(p).with_context(|| format!("loading {}", p.display())),
        None => Ok(ServiceConfig::default()),
    }
}

#[cfg(feature = "server")]
fn serve(
    mut config: ServiceConfig,
    listen: Option<String>,
    port: Option<u16>,
    workers: Option<usize>,
) -> anyhow::Result<()> {
    if let Some(listen) = listen {
        config.listen = listen;
    }
    if let Some(port) = port {
        config.port = port;
    }
    if let Some(workers) = workers {
        config.workers = workers;
    }
    let service = BadgeService::from_config(&config)?.into_shared();
    let addr = format!("{}:{}", config.listen, config.port);
    let server = badgeserver::server::Server::bind(service, &addr, config.worker_count())?;
    server.run()?;
    Ok(())
}

#[cfg(not(feature = "server"))]
fn serve(_: ServiceConfig, _: Option<String>, _: Option<u16>, _: Option<usize>) -> anyhow::Result<()> {
    anyhow::bail!("badgeserver was built without the `server` feature")
}

fn main() -> anyhow::Result<()> {
    let _ = env_logger::builder()
        .filter_level(log::LevelFilter::Info)
        .parse_default_env()
        .try_init();

    let cli = Cli::parse();
    let config = load_config(cli.config.as_ref())?;

    match cli.command.unwrap_or(Cmd::Serve {
        listen: None,
        port: None,
        workers: None,
    }) {
        Cmd::Serve {
            listen,
            port,
            workers,
        } => serve(config, listen, port, workers),
        Cmd::Render {
            vendor,
            status,
            color,
            vendor_width,
            status_width,
            format,
            converter,
            output,
            data_uri,
        } => {
            // Fail on a bad format before building anything.
            let format: OutputFormat = format.parse()?;
            let backend: RasterBackend = converter.parse()?;
            let service = BadgeService::from_config(&config)?;
            let request = BadgeRequest {
                vendor,
                status,
                color,
                vendor_width,
                status_width,
            };
            let badge = service.render(&request, format, backend)?;
            let bytes = if data_uri {
                let encoded = base64::engine::general_purpose::STANDARD.encode(&badge.bytes);
                format!("data:{};base64,{}\n", badge.content_type, encoded).into_bytes()
            } else {
                badge.bytes
            };
            match output {
                Some(path) => std::fs::write(&path, bytes)
                    .with_context(|| format!("writing {}", path.display()))?,
                None => std::io::stdout().lock().write_all(&bytes)?,
            }
            Ok(())
        }
        Cmd::Colors { all, json } => {
            let service = BadgeService::from_config(&config)?;
            let templates = service.templates();
            let colors: Vec<&str> = if all {
                templates.colors().iter().map(String::as_str).collect()
            } else {
                templates.selectable_colors()
            };
            if json {
                println!("{}", serde_json::to_string(&colors)?);
            } else {
                for c in colors {
                    println!("{}", c);
                }
            }
            Ok(())
        }
    }
}
