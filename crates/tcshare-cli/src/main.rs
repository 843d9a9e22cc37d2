//! tcshare: encrypted file sharing client
//!
//! Commands:
//!   upload <file>                  - encrypt and upload, print the share link
//!   download <link|id> [<key>]     - fetch, verify, and decrypt into a file
//!   config show                    - display current configuration

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use indicatif::{ProgressBar, ProgressStyle};
use secrecy::SecretString;
use std::path::{Path, PathBuf};
use std::time::Duration;

use tcshare_core::config::{Backend, TcshareConfig};
use tcshare_core::types::SendResult;
use tcshare_storage::S3Credentials;
use tcshare_transfer::{
    AnyReceiver, AnySender, CancellationToken, DownloadPipeline, EntropySource, KeyInput,
    Sender, UploadOptions, UploadPipeline,
};

/// Wrong-password attempts before a download gives up
const PASSWORD_ATTEMPTS: usize = 3;

// ── CLI structure ──────────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(
    name = "tcshare",
    version,
    about = "Encrypted file sharing client",
    long_about = "tcshare: encrypt files client-side, upload them in chunks, and share a link whose fragment carries the key"
)]
struct Cli {
    /// Path to tcshare.toml configuration file
    #[arg(long, short = 'c', env = "TCSHARE_CONFIG", default_value = "/etc/tcshare/config.toml")]
    config: PathBuf,

    /// Override the configured storage backend
    #[arg(long, short = 'b', value_enum, global = true)]
    backend: Option<BackendArg>,

    /// Log filter (e.g. "debug", "tcshare_transfer=trace")
    #[arg(long, env = "TCSHARE_LOG", default_value = "warn", global = true)]
    log: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum BackendArg {
    SelfHosted,
    ObjectStore,
}

impl From<BackendArg> for Backend {
    fn from(arg: BackendArg) -> Self {
        match arg {
            BackendArg::SelfHosted => Backend::SelfHosted,
            BackendArg::ObjectStore => Backend::ObjectStore,
        }
    }
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Encrypt and upload a file, then print its share link
    ///
    /// For the object_store backend, credentials are read from
    /// AWS_ACCESS_KEY_ID and AWS_SECRET_ACCESS_KEY.
    Upload {
        /// Local file to share
        file: PathBuf,
        /// Protect the upload with a password (prompted, never echoed)
        #[arg(long, short = 'p')]
        password: bool,
    },

    /// Download and decrypt a shared file
    Download {
        /// Share link (`.../download/<id>#<key>`) or bare object id
        target: String,
        /// Key fragment, when `target` is a bare id
        key: Option<String>,
        /// Output path (default: the uploaded file name in the current directory)
        #[arg(long, short = 'o')]
        output: Option<PathBuf>,
    },

    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand, Debug)]
enum ConfigAction {
    /// Print the active configuration (merged defaults + config file)
    Show,
}

// ── Entry point ───────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_new(&cli.log)
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let mut config = load_config(&cli.config).await?;
    if let Some(backend) = cli.backend {
        config.storage.backend = backend.into();
    }

    match cli.command {
        Commands::Upload { file, password } => cmd_upload(&config, &file, password).await,
        Commands::Download { target, key, output } => {
            cmd_download(&config, &target, key.as_deref(), output.as_deref()).await
        }
        Commands::Config { action: ConfigAction::Show } => cmd_config_show(&config, &cli.config),
    }
}

// ── Config loading ────────────────────────────────────────────────────────────

async fn load_config(path: &Path) -> Result<TcshareConfig> {
    if path.exists() {
        let content = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("reading config: {}", path.display()))?;
        toml::from_str(&content).with_context(|| format!("parsing config: {}", path.display()))
    } else {
        tracing::warn!(path = %path.display(), "config file not found, using defaults");
        Ok(TcshareConfig::default())
    }
}

/// Object-store operator from config + environment credentials. Only the
/// object_store backend needs one.
fn operator_for(config: &TcshareConfig) -> Result<Option<opendal::Operator>> {
    if config.storage.backend != Backend::ObjectStore {
        return Ok(None);
    }
    let credentials = S3Credentials::from_env()?;
    let op = tcshare_storage::build_operator(&config.storage, &credentials)
        .context("building storage operator")?;
    Ok(Some(op))
}

// ── Progress display ──────────────────────────────────────────────────────────

fn make_progress_bar(total: u64, prefix: &str) -> ProgressBar {
    let pb = ProgressBar::new(total);
    let style = ProgressStyle::with_template(
        "{prefix:.bold} [{bar:40.cyan/blue}] {bytes}/{total_bytes} ({bytes_per_sec}) {msg}",
    )
    .unwrap_or_else(|_| ProgressStyle::default_bar())
    .progress_chars("=>-");
    pb.set_style(style);
    pb.set_prefix(prefix.to_string());
    pb.enable_steady_tick(Duration::from_millis(100));
    pb
}

/// Cancel `token` on the first Ctrl-C.
fn cancel_on_ctrl_c(token: &CancellationToken) {
    let token = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("\ninterrupted, cancelling...");
            token.cancel();
        }
    });
}

// ── `tcshare upload` ──────────────────────────────────────────────────────────

async fn cmd_upload(config: &TcshareConfig, file: &Path, with_password: bool) -> Result<()> {
    let operator = operator_for(config)?;
    if let Some(op) = &operator {
        tcshare_storage::check_writable(op)
            .await
            .context("object store is not reachable")?;
    }
    let sender = AnySender::from_config(config, operator)?;
    let password = if with_password {
        Some(prompt_new_password()?)
    } else {
        None
    };

    let size = tokio::fs::metadata(file)
        .await
        .with_context(|| format!("reading {}", file.display()))?
        .len();
    let pb = make_progress_bar(size, "upload");
    let tick = pb.clone();

    let options = UploadOptions {
        transfer: config.transfer.clone(),
        password,
        entropy: EntropySource::from_config(&config.storage),
        progress: Some(Box::new(move |n| tick.inc(n))),
    };
    let pipeline = UploadPipeline::from_path(file, options)
        .await
        .with_context(|| format!("preparing upload of {}", file.display()))?;

    let cancel = CancellationToken::new();
    cancel_on_ctrl_c(&cancel);

    let result = sender.send(pipeline, cancel).await;
    pb.finish_and_clear();
    let result = result.context("upload failed")?;

    if result.is_canceled() {
        println!("Upload cancelled, nothing was stored.");
        return Ok(());
    }

    for line in share_summary(&config.storage.backend, &result) {
        println!("{line}");
    }
    Ok(())
}

/// Lines printed after a successful upload. Only the self-hosted server
/// serves `/download/{id}`, so object-store uploads get the presigned URL.
fn share_summary(backend: &Backend, result: &SendResult) -> Vec<String> {
    let mut lines = vec![
        format!("id:   {}", result.id),
        format!("key:  {}", result.key_fragment),
    ];
    match (backend, &result.share_url) {
        (Backend::SelfHosted, Some(url)) => lines.push(format!("link: {url}")),
        (Backend::ObjectStore, Some(url)) => lines.push(format!("presigned object URL: {url}")),
        (_, None) => {}
    }
    lines
}

fn prompt_new_password() -> Result<SecretString> {
    let first = rpassword::prompt_password("Password: ").context("reading password")?;
    if first.is_empty() {
        anyhow::bail!("password must not be empty");
    }
    let confirm = rpassword::prompt_password("Confirm password: ").context("reading password")?;
    if first != confirm {
        anyhow::bail!("passwords do not match");
    }
    Ok(SecretString::from(first))
}

// ── `tcshare download` ────────────────────────────────────────────────────────

async fn cmd_download(
    config: &TcshareConfig,
    target: &str,
    key: Option<&str>,
    output: Option<&Path>,
) -> Result<()> {
    let (id, fragment) = parse_target(target, key)?;
    let receiver = AnyReceiver::from_config(config, operator_for(config)?, &id)?;

    let pb = make_progress_bar(0, "download");
    let tick = pb.clone();
    let mut pipeline = DownloadPipeline::new(receiver, config.transfer.clone())?
        .with_progress(Box::new(move |n| tick.inc(n)));

    pipeline
        .fetch_plain_data()
        .await
        .with_context(|| format!("fetching {id}"))?;

    let needs_password = pipeline.password_required()?;
    let mut attempts = 0;
    loop {
        let password = if needs_password {
            pb.suspend(|| rpassword::prompt_password("Password: "))
                .map(SecretString::from)
                .map(Some)
                .context("reading password")?
        } else {
            None
        };

        if pipeline
            .validate(KeyInput::Fragment(&fragment), password.as_ref())
            .await?
        {
            break;
        }

        attempts += 1;
        if !needs_password {
            pb.finish_and_clear();
            anyhow::bail!("key does not match this file");
        }
        if attempts >= PASSWORD_ATTEMPTS {
            pb.finish_and_clear();
            anyhow::bail!("wrong password ({attempts} attempts)");
        }
        pb.suspend(|| eprintln!("Wrong password, try again."));
    }

    let metadata = pipeline
        .metadata()
        .cloned()
        .context("validated download is missing its metadata")?;
    let dest = match output {
        Some(path) => path.to_path_buf(),
        None => PathBuf::from(safe_file_name(&metadata.name, &id)),
    };
    pb.set_length(metadata.size);
    pb.set_message(metadata.name.clone());

    let written = pipeline.download_to_path(&dest).await;
    pb.finish_and_clear();
    let written = written.with_context(|| format!("downloading into {}", dest.display()))?;

    println!("{} ({written} bytes) → {}", metadata.name, dest.display());
    Ok(())
}

/// Split a share link into `(id, key)`, or pair a bare id with `key`.
fn parse_target(target: &str, key: Option<&str>) -> Result<(String, String)> {
    let (location, link_key) = match target.split_once('#') {
        Some((location, fragment)) => (location, Some(fragment)),
        None => (target, None),
    };

    let id = location
        .trim_end_matches('/')
        .rsplit('/')
        .next()
        .filter(|s| !s.is_empty())
        .with_context(|| format!("no object id in {target:?}"))?;

    let key = key
        .or(link_key)
        .filter(|k| !k.is_empty())
        .context("missing key: pass a full share link or the key as a second argument")?;

    Ok((id.to_string(), key.to_string()))
}

/// The uploaded name may carry path components; only its last one is used.
fn safe_file_name(name: &str, fallback: &str) -> String {
    Path::new(name)
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .filter(|n| n != "." && n != "..")
        .unwrap_or_else(|| fallback.to_string())
}

// ── `tcshare config show` ─────────────────────────────────────────────────────

fn cmd_config_show(config: &TcshareConfig, config_path: &Path) -> Result<()> {
    if config_path.exists() {
        println!("# Configuration from: {}", config_path.display());
    } else {
        println!("# Configuration: defaults (no file at {})", config_path.display());
    }
    println!();
    let rendered = toml::to_string_pretty(config).context("serializing config to TOML")?;
    print!("{rendered}");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sent(share_url: Option<&str>) -> SendResult {
        SendResult {
            id: "abc123".into(),
            key_fragment: "S2V5".into(),
            share_url: share_url.map(String::from),
        }
    }

    #[test]
    fn test_self_hosted_summary_prints_link() {
        let url = "https://share.example.com/download/abc123#S2V5";
        let lines = share_summary(&Backend::SelfHosted, &sent(Some(url)));
        assert_eq!(lines[0], "id:   abc123");
        assert_eq!(lines[1], "key:  S2V5");
        assert_eq!(lines[2], format!("link: {url}"));
    }

    #[test]
    fn test_object_store_summary_has_no_server_link() {
        let presigned = "https://bucket.s3.example.com/abc123?X-Amz-Signature=f00";
        let lines = share_summary(&Backend::ObjectStore, &sent(Some(presigned)));
        assert_eq!(lines.len(), 3);
        assert!(lines.iter().all(|l| !l.starts_with("link:")));
        assert_eq!(lines[2], format!("presigned object URL: {presigned}"));

        let lines = share_summary(&Backend::ObjectStore, &sent(None));
        assert_eq!(lines, vec!["id:   abc123", "key:  S2V5"]);
    }

    #[test]
    fn test_parse_full_link() {
        let (id, key) =
            parse_target("https://share.example.com/download/abc123#S2V5", None).unwrap();
        assert_eq!(id, "abc123");
        assert_eq!(key, "S2V5");
    }

    #[test]
    fn test_parse_bare_id_with_key() {
        let (id, key) = parse_target("abc123", Some("S2V5")).unwrap();
        assert_eq!(id, "abc123");
        assert_eq!(key, "S2V5");
    }

    #[test]
    fn test_explicit_key_overrides_link() {
        let (_, key) = parse_target("http://h/download/abc#old", Some("new")).unwrap();
        assert_eq!(key, "new");
    }

    #[test]
    fn test_parse_rejects_missing_parts() {
        assert!(parse_target("abc123", None).is_err());
        assert!(parse_target("abc123#", None).is_err());
        assert!(parse_target("#key", None).is_err());
    }

    #[test]
    fn test_safe_file_name_strips_directories() {
        assert_eq!(safe_file_name("../../etc/passwd", "id"), "passwd");
        assert_eq!(safe_file_name("report.pdf", "id"), "report.pdf");
        assert_eq!(safe_file_name("..", "id"), "id");
        assert_eq!(safe_file_name("", "id"), "id");
    }

    #[test]
    fn test_backend_override() {
        assert_eq!(Backend::from(BackendArg::ObjectStore), Backend::ObjectStore);
        assert_eq!(Backend::from(BackendArg::SelfHosted), Backend::SelfHosted);
    }

    #[test]
    fn test_cli_parses_download() {
        let cli = Cli::try_parse_from([
            "tcshare",
            "--backend",
            "object-store",
            "download",
            "abc",
            "key",
            "-o",
            "/tmp/out",
        ])
        .unwrap();
        assert!(matches!(cli.backend, Some(BackendArg::ObjectStore)));
        match cli.command {
            Commands::Download { target, key, output } => {
                assert_eq!(target, "abc");
                assert_eq!(key.as_deref(), Some("key"));
                assert_eq!(output, Some(PathBuf::from("/tmp/out")));
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }
}
