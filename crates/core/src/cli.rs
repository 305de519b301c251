//! Hand-rolled argument parsing, matching the teacher's `cli.rs`: a
//! `while`-loop `std::env::args()` scan, `anyhow::Context` on missing
//! values, no `clap` dependency.

use anyhow::Context;

#[derive(Debug)]
pub struct Args {
    pub mkv_path: String,
    pub config_path: String,
    pub guild_id: Option<String>,
    pub channel_id: String,
    pub user_id: String,
    pub session_id: String,
    pub endpoint: String,
    pub token: String,
    pub force_chacha: bool,
}

pub fn parse_args() -> anyhow::Result<Args> {
    parse_from(std::env::args().collect())
}

fn parse_from(args: Vec<String>) -> anyhow::Result<Args> {
    let mut mkv_path = String::new();
    let mut config_path = "golive.toml".to_string();
    let mut guild_id = None;
    let mut channel_id = String::new();
    let mut user_id = String::new();
    let mut session_id = String::new();
    let mut endpoint = String::new();
    let mut token = None;
    let mut force_chacha = false;

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "-V" | "--version" => {
                println!("golive-core {}", env!("CARGO_PKG_VERSION"));
                std::process::exit(0);
            }
            "-h" | "--help" => {
                println!("golive-core - Go-Live MKV-to-RTP media transport core");
                println!();
                println!("USAGE:");
                println!("    golive-core [OPTIONS]");
                println!();
                println!("OPTIONS:");
                println!("    --input <PATH>           MKV source file, or \"-\" for stdin (required)");
                println!("    --config <PATH>          TOML config file [default: golive.toml]");
                println!("    --guild-id <ID>          Guild id (omit for a DM/call stream)");
                println!("    --channel-id <ID>        Voice channel id (required)");
                println!("    --user-id <ID>           Streaming user id (required)");
                println!("    --session-id <ID>        Voice session id from VOICE_STATE_UPDATE (required)");
                println!("    --endpoint <HOST>        Voice gateway endpoint from VOICE_SERVER_UPDATE (required)");
                println!("    --token <TOKEN>          Voice token (prefer GOLIVE_VOICE_TOKEN env)");
                println!("    --force-chacha           Force XChaCha20 even when the server offers AES-GCM");
                println!("    -V, --version            Print version and exit");
                println!("    -h, --help               Print this help and exit");
                std::process::exit(0);
            }
            "--input" => {
                i += 1;
                mkv_path = args.get(i).context("missing --input value")?.clone();
            }
            "--config" => {
                i += 1;
                config_path = args.get(i).context("missing --config value")?.clone();
            }
            "--guild-id" => {
                i += 1;
                guild_id = Some(args.get(i).context("missing --guild-id value")?.clone());
            }
            "--channel-id" => {
                i += 1;
                channel_id = args.get(i).context("missing --channel-id value")?.clone();
            }
            "--user-id" => {
                i += 1;
                user_id = args.get(i).context("missing --user-id value")?.clone();
            }
            "--session-id" => {
                i += 1;
                session_id = args.get(i).context("missing --session-id value")?.clone();
            }
            "--endpoint" => {
                i += 1;
                endpoint = args.get(i).context("missing --endpoint value")?.clone();
            }
            "--token" => {
                i += 1;
                token = Some(args.get(i).context("missing --token value")?.clone());
            }
            "--force-chacha" => {
                force_chacha = true;
            }
            other => anyhow::bail!("unknown argument: {other}"),
        }
        i += 1;
    }

    if token.is_none() {
        token = std::env::var("GOLIVE_VOICE_TOKEN").ok();
    }

    anyhow::ensure!(!mkv_path.is_empty(), "--input is required");
    anyhow::ensure!(!channel_id.is_empty(), "--channel-id is required");
    anyhow::ensure!(!user_id.is_empty(), "--user-id is required");
    anyhow::ensure!(!session_id.is_empty(), "--session-id is required");
    anyhow::ensure!(!endpoint.is_empty(), "--endpoint is required");

    Ok(Args {
        mkv_path,
        config_path,
        guild_id,
        channel_id,
        user_id,
        session_id,
        endpoint,
        token: token.context("--token or GOLIVE_VOICE_TOKEN is required")?,
        force_chacha,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn argv(parts: &[&str]) -> Vec<String> {
        std::iter::once("golive-core".to_string())
            .chain(parts.iter().map(|s| s.to_string()))
            .collect()
    }

    #[test]
    fn parses_required_flags() {
        let args = parse_from(argv(&[
            "--input", "video.mkv",
            "--channel-id", "c1",
            "--user-id", "u1",
            "--session-id", "s1",
            "--endpoint", "gateway.example",
            "--token", "tok",
        ]))
        .unwrap();
        assert_eq!(args.mkv_path, "video.mkv");
        assert_eq!(args.config_path, "golive.toml");
        assert_eq!(args.guild_id, None);
        assert!(!args.force_chacha);
    }

    #[test]
    fn missing_required_flag_is_an_error() {
        let err = parse_from(argv(&["--input", "video.mkv"])).unwrap_err();
        assert!(err.to_string().contains("--channel-id"));
    }

    #[test]
    fn rejects_unknown_flag() {
        let err = parse_from(argv(&["--bogus"])).unwrap_err();
        assert!(err.to_string().contains("--bogus"));
    }

    #[test]
    fn force_chacha_flag_is_a_bare_switch() {
        let args = parse_from(argv(&[
            "--input", "video.mkv",
            "--channel-id", "c1",
            "--user-id", "u1",
            "--session-id", "s1",
            "--endpoint", "gateway.example",
            "--token", "tok",
            "--force-chacha",
        ]))
        .unwrap();
        assert!(args.force_chacha);
    }
}
