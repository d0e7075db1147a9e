//! stickyctl - inspect and edit sticky session mappings
//!
//! This is the composition root: configuration comes from the same
//! environment variables the router uses.

use anyhow::{anyhow, bail, Context};
use sticky_affinity::{connect_affinity, load_config, ChannelId, ChannelType};
use std::time::Duration;
use tracing_subscriber::fmt::format::FmtSpan;

const USAGE: &str = "usage:
  stickyctl get     <channel-type> <fingerprint>
  stickyctl inspect <channel-type> <fingerprint>
  stickyctl set     <channel-type> <fingerprint> <channel-id> [ttl-secs]
  stickyctl del     <channel-type> <fingerprint>
  stickyctl renew   <channel-type> <fingerprint>";

#[derive(Debug, PartialEq, Eq)]
enum Command {
    Get,
    Inspect,
    Set { channel_id: ChannelId, ttl: Duration },
    Delete,
    Renew,
}

#[derive(Debug, PartialEq, Eq)]
struct Invocation {
    command: Command,
    channel_type: ChannelType,
    fingerprint: String,
}

fn parse_args(args: &[String]) -> anyhow::Result<Invocation> {
    let [verb, channel_type, fingerprint, rest @ ..] = args else {
        bail!("missing arguments\n{}", USAGE);
    };
    let channel_type = ChannelType::from_str(channel_type);

    let command = match (verb.as_str(), rest) {
        ("get", []) => Command::Get,
        ("inspect", []) => Command::Inspect,
        ("del" | "delete", []) => Command::Delete,
        ("renew", []) => Command::Renew,
        ("set", [id, ttl @ ..]) if ttl.len() <= 1 => {
            let id: u64 = id.parse().with_context(|| format!("invalid channel id {:?}", id))?;
            let channel_id = ChannelId::new(id).ok_or_else(|| anyhow!("channel id 0 is reserved"))?;
            let ttl = match ttl.first() {
                Some(secs) => Duration::from_secs(
                    secs.parse().with_context(|| format!("invalid ttl {:?}", secs))?,
                ),
                None => Duration::ZERO,
            };
            Command::Set { channel_id, ttl }
        }
        _ => bail!("unrecognized command\n{}", USAGE),
    };

    Ok(Invocation {
        command,
        channel_type,
        fingerprint: fingerprint.clone(),
    })
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cfg = load_config()?;

    let log_level = if cfg.debug {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };

    tracing_subscriber::fmt()
        .with_max_level(log_level)
        .with_span_events(FmtSpan::CLOSE)
        .with_writer(std::io::stderr)
        .init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let inv = parse_args(&args)?;

    let manager = connect_affinity(&cfg).await?;
    if !manager.is_enabled() {
        tracing::warn!("sticky sessions are disabled; nothing to do");
    }

    let fp = inv.fingerprint.as_str();
    let ty = inv.channel_type;

    match inv.command {
        Command::Get => match manager.get_mapping(fp, ty).await? {
            Some(id) => println!("{}", id),
            None => println!("none"),
        },
        Command::Inspect => match manager.inspect(fp, ty).await? {
            Some(m) => println!("{} -> {} (ttl {})", m.key, m.channel_id, m.ttl),
            None => println!("none"),
        },
        Command::Set { channel_id, ttl } => {
            manager.set_mapping(fp, channel_id, ty, ttl).await?;
            println!("ok");
        }
        Command::Delete => {
            manager.delete_mapping(fp, ty).await?;
            println!("ok");
        }
        Command::Renew => {
            let settings = cfg.sticky_settings();
            let outcome = manager
                .renew_mapping(fp, ty, settings.ttl, settings.renewal_threshold_minutes)
                .await?;
            println!("{:?}", outcome);
        }
    }

    Ok(())
}
