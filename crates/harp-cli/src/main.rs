//! harp: secret container CLI
//!
//! Commands:
//!   seal                     - seal a JSON bundle into a container
//!   unseal                   - open a container back into a JSON bundle
//!   identity new|recover     - create a recipient identity, or unlock one
//!   bundle encrypt|decrypt   - in-bundle value protection
//!   transform encode|decode  - apply a transformer key string to a value
//!   keygen <kind>            - generate a transformer key string
//!
//! Container bytes and bundles go to stdout (or `--out`). Logs, prompts and
//! container keys go to stderr.

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use secrecy::{ExposeSecret, SecretString};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use zeroize::Zeroizing;

use harp_bundle::{Bundle, ProtectionOptions};
use harp_container::{
    identity_new, identity_recover, seal, unseal, IdentityFile, IdentityKey, IdentityVersion,
    KeyWrap, SealOptions, UnsealKey, UnsealOptions,
};
use harp_core::config::HarpConfig;
use harp_core::io::SecretPrompt;
use harp_core::{ErrorKind, HarpError, HarpResult};
use harp_crypto::{keygen, DckdSeed, Direction, TransformContext};

// ── CLI structure ──────────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(
    name = "harp",
    version,
    about = "Secret container toolchain",
    long_about = "harp: seal secret bundles for recipient identities and unseal them again"
)]
struct Cli {
    /// Path to harp.toml configuration file
    #[arg(long, short = 'c', env = "HARP_CONFIG", default_value = "/etc/harp/harp.toml")]
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error); overrides the config file
    #[arg(long, env = "HARP_LOG", global = true)]
    log: Option<String>,

    /// Log format; overrides the config file
    #[arg(long, env = "HARP_LOG_FORMAT", global = true)]
    log_format: Option<LogFormat>,

    /// Restrict every primitive to the FIPS whitelist
    #[arg(long, global = true)]
    fips: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Debug, ValueEnum)]
enum LogFormat {
    Json,
    Text,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Seal a JSON bundle into a container
    Seal {
        #[command(flatten)]
        io: IoArgs,
        /// Recipient public key (`v1.sk.…` / `v2.sk.…`), repeatable
        #[arg(long = "recipient", short = 'r')]
        recipients: Vec<String>,
        /// Identity file whose public key becomes a recipient, repeatable
        #[arg(long = "identity")]
        identities: Vec<PathBuf>,
        #[command(flatten)]
        dckd: DckdArgs,
        /// Do not add the generated container identity as a recipient
        #[arg(long)]
        no_container_identity: bool,
        /// Report seal metadata as JSON on stderr
        #[arg(long)]
        json: bool,
        #[command(flatten)]
        protection: ProtectionArgs,
    },

    /// Open a container back into a JSON bundle
    Unseal {
        #[command(flatten)]
        io: IoArgs,
        /// Container key, or a `v1.ck.…` / `v2.ck.…` identity private key
        #[arg(long, env = "HARP_CONTAINER_KEY", hide_env_values = true)]
        key: Option<String>,
        /// Identity file to try, repeatable
        #[arg(long = "identity")]
        identities: Vec<PathBuf>,
        /// Transformer key unlocking the identity files (instead of a passphrase)
        #[arg(long, env = "HARP_IDENTITY_TRANSFORMER", hide_env_values = true)]
        identity_transformer: Option<String>,
        #[command(flatten)]
        dckd: DckdArgs,
        #[command(flatten)]
        protection: ProtectionArgs,
    },

    /// Recipient identity management
    Identity {
        #[command(subcommand)]
        action: IdentityAction,
    },

    /// In-bundle value protection
    Bundle {
        #[command(subcommand)]
        action: BundleAction,
    },

    /// Apply a transformer key string to a value
    Transform {
        #[command(subcommand)]
        action: TransformAction,
    },

    /// Generate a transformer key string
    Keygen {
        /// Key kind, e.g. aes-gcm:256, xchacha20, fernet (see --list)
        kind: Option<String>,
        /// List the supported kinds
        #[arg(long)]
        list: bool,
    },
}

#[derive(Subcommand, Debug)]
enum IdentityAction {
    /// Generate an identity and write its file
    New {
        /// Free-form description stored in the identity file
        #[arg(long, short = 'd', default_value = "")]
        description: String,
        /// Identity version: modern (v1) or nist (v2); defaults from config
        #[arg(long)]
        version: Option<String>,
        /// Identity file to write ("-" for stdout)
        #[arg(long = "out", short = 'o', default_value = "-")]
        output: PathBuf,
        /// Wrap the private key with this transformer key instead of a passphrase
        #[arg(long, env = "HARP_IDENTITY_TRANSFORMER", hide_env_values = true)]
        transformer: Option<String>,
    },

    /// Unlock an identity file and print its private key string
    Recover {
        /// Identity file to read ("-" for stdin)
        #[arg(long = "in", short = 'i', default_value = "-")]
        input: PathBuf,
        /// Transformer key that wraps the private key (instead of a passphrase)
        #[arg(long, env = "HARP_IDENTITY_TRANSFORMER", hide_env_values = true)]
        transformer: Option<String>,
    },
}

#[derive(Subcommand, Debug)]
enum BundleAction {
    /// Encrypt bundle values in place
    Encrypt {
        #[command(flatten)]
        io: IoArgs,
        #[command(flatten)]
        protection: ProtectionArgs,
    },
    /// Decrypt bundle values in place
    Decrypt {
        #[command(flatten)]
        io: IoArgs,
        #[command(flatten)]
        protection: ProtectionArgs,
    },
}

#[derive(Subcommand, Debug)]
enum TransformAction {
    /// Encode / encrypt / sign / compress / hash
    Encode(TransformArgs),
    /// Decode / decrypt / verify / decompress
    Decode(TransformArgs),
}

#[derive(Args, Debug)]
struct IoArgs {
    /// Input file ("-" for stdin)
    #[arg(long = "in", short = 'i', default_value = "-")]
    input: PathBuf,
    /// Output file ("-" for stdout)
    #[arg(long = "out", short = 'o', default_value = "-")]
    output: PathBuf,
}

#[derive(Args, Debug)]
struct DckdArgs {
    /// Deterministic mode master key (base64url, 32 bytes)
    #[arg(
        long,
        env = "HARP_DCKD_MASTER_KEY",
        hide_env_values = true,
        requires = "dckd_target"
    )]
    dckd_master_key: Option<String>,
    /// Deterministic mode derivation target, e.g. "us-east-1/v1"
    #[arg(long, requires = "dckd_master_key")]
    dckd_target: Option<String>,
}

#[derive(Args, Debug)]
struct ProtectionArgs {
    /// Whole-bundle transformer key for value protection
    #[arg(long, env = "HARP_BUNDLE_TRANSFORMER", hide_env_values = true)]
    transformer: Option<String>,
    /// Alias-to-transformer mapping for annotated packages, repeatable
    #[arg(long = "key-alias", value_name = "ALIAS=KEY")]
    key_aliases: Vec<String>,
    /// Leave packages with an unmapped alias untouched instead of failing
    #[arg(long)]
    skip_unresolved: bool,
}

#[derive(Args, Debug)]
struct TransformArgs {
    /// Transformer key string, e.g. aes-gcm:<b64>
    #[arg(long, env = "HARP_TRANSFORMER_KEY", hide_env_values = true)]
    key: String,
    /// Associated data bound into AEAD tags
    #[arg(long)]
    aad: Option<String>,
    #[command(flatten)]
    io: IoArgs,
}

impl DckdArgs {
    fn seed(&self) -> Result<Option<DckdSeed>> {
        match (&self.dckd_master_key, &self.dckd_target) {
            (Some(master), Some(target)) => Ok(Some(
                DckdSeed::from_key_string(master, target).context("loading DCKD master key")?,
            )),
            _ => Ok(None),
        }
    }
}

impl ProtectionArgs {
    fn options(&self) -> Result<Option<ProtectionOptions>> {
        match (&self.transformer, self.key_aliases.is_empty()) {
            (None, true) => Ok(None),
            (Some(_), false) => {
                anyhow::bail!("--transformer and --key-alias are mutually exclusive")
            }
            (Some(key), true) => Ok(Some(ProtectionOptions::whole(key.as_str()))),
            (None, false) => {
                let aliases = self
                    .key_aliases
                    .iter()
                    .map(|pair| parse_alias(pair))
                    .collect::<Result<Vec<_>>>()?;
                Ok(Some(ProtectionOptions::aliased(aliases, self.skip_unresolved)))
            }
        }
    }

    fn required(&self) -> Result<ProtectionOptions> {
        self.options()?
            .context("either --transformer or at least one --key-alias is required")
    }
}

fn parse_alias(pair: &str) -> Result<(String, String)> {
    let (alias, key) = pair
        .split_once('=')
        .with_context(|| format!("--key-alias expects ALIAS=KEY, got '{}'", redact(pair)))?;
    let alias = alias.trim();
    if alias.is_empty() || key.is_empty() {
        anyhow::bail!("--key-alias expects ALIAS=KEY, got '{}'", redact(pair));
    }
    Ok((alias.to_string(), key.to_string()))
}

/// Alias part only, for error messages.
fn redact(pair: &str) -> String {
    match pair.split_once('=') {
        Some((alias, _)) => format!("{alias}=…"),
        None => "…".into(),
    }
}

// ── Entry point ───────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    if let Err(err) = run(cli).await {
        eprintln!("harp: {err:#}");
        std::process::exit(exit_code(&err));
    }
}

async fn run(cli: Cli) -> Result<()> {
    let (config, found) = load_config(&cli.config).await?;

    let level = cli.log.clone().unwrap_or_else(|| config.log.level.clone());
    let format = match cli.log_format.clone() {
        Some(format) => format,
        None => LogFormat::from_str(&config.log.format, true).unwrap_or(LogFormat::Text),
    };
    init_logging(&level, &format);

    if !found {
        tracing::warn!(
            "config file not found: {}  (using defaults)",
            cli.config.display()
        );
    }
    // Otherwise the flag is probed from HARP_FIPS on first use.
    if cli.fips || config.crypto.fips {
        harp_core::fips::init(true)?;
    }
    tracing::debug!(
        version = env!("CARGO_PKG_VERSION"),
        fips = harp_core::fips::enabled(),
        "harp starting"
    );

    match cli.command {
        Commands::Seal {
            io,
            recipients,
            identities,
            dckd,
            no_container_identity,
            json,
            protection,
        } => {
            let options = SealOptions {
                recipients,
                identity_files: load_identity_files(&identities).await?,
                dckd: dckd.seed()?,
                no_container_identity,
                json_output: json,
                protection: protection.options()?,
                limits: config.limits.effective(),
            };
            cmd_seal(&config, &io, &options).await
        }
        Commands::Unseal {
            io,
            key,
            identities,
            identity_transformer,
            dckd,
            protection,
        } => {
            let key = unseal_key(key, &identities, identity_transformer, &dckd).await?;
            cmd_unseal(&config, &io, key, protection.options()?).await
        }
        Commands::Identity {
            action:
                IdentityAction::New {
                    description,
                    version,
                    output,
                    transformer,
                },
        } => cmd_identity_new(&config, &description, version.as_deref(), &output, transformer).await,
        Commands::Identity {
            action: IdentityAction::Recover { input, transformer },
        } => cmd_identity_recover(&config, &input, transformer).await,
        Commands::Bundle {
            action: BundleAction::Encrypt { io, protection },
        } => cmd_bundle(&config, &io, &protection.required()?, Direction::Encode).await,
        Commands::Bundle {
            action: BundleAction::Decrypt { io, protection },
        } => cmd_bundle(&config, &io, &protection.required()?, Direction::Decode).await,
        Commands::Transform {
            action: TransformAction::Encode(args),
        } => cmd_transform(&config, args, Direction::Encode).await,
        Commands::Transform {
            action: TransformAction::Decode(args),
        } => cmd_transform(&config, args, Direction::Decode).await,
        Commands::Keygen { kind, list } => cmd_keygen(kind.as_deref(), list),
    }
}

/// Process exit status for a failed command, by error family.
fn exit_code(err: &anyhow::Error) -> i32 {
    let Some(harp) = err.chain().find_map(|e| e.downcast_ref::<HarpError>()) else {
        return 1;
    };
    match harp.kind() {
        ErrorKind::InputValidation => 2,
        ErrorKind::UnsupportedPrimitive => 3,
        ErrorKind::UnsupportedContainerVersion => 4,
        ErrorKind::UnsupportedVersion => 5,
        ErrorKind::FipsNotPermitted => 6,
        ErrorKind::InvalidKeyMaterial => 7,
        ErrorKind::AuthenticationFailed => 8,
        ErrorKind::NoMatchingRecipient => 9,
        ErrorKind::UnresolvedAlias => 10,
        ErrorKind::SizeLimitExceeded => 11,
        ErrorKind::IoFailure => 12,
    }
}

// ── Logging ───────────────────────────────────────────────────────────────────

fn init_logging(level: &str, format: &LogFormat) {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    // stdout carries container bytes; everything else goes to stderr.
    match format {
        LogFormat::Json => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().json().with_writer(std::io::stderr))
                .init();
        }
        LogFormat::Text => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().with_writer(std::io::stderr))
                .init();
        }
    }
}

// ── Config loading ────────────────────────────────────────────────────────────

/// Returns the config and whether the file existed.
async fn load_config(path: &Path) -> Result<(HarpConfig, bool)> {
    if !path.exists() {
        return Ok((HarpConfig::default(), false));
    }
    let content = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("reading config: {}", path.display()))?;
    let config = HarpConfig::from_toml(&content)
        .with_context(|| format!("parsing config: {}", path.display()))?;
    Ok((config, true))
}

// ── I/O helpers ───────────────────────────────────────────────────────────────

fn is_stdio(path: &Path) -> bool {
    path == Path::new("-")
}

/// Read a whole input under the container size cap and the first-byte timeout.
async fn read_input(config: &HarpConfig, path: &Path) -> Result<Vec<u8>> {
    let limit = config.limits.effective().max_container_size;
    let timeout = Duration::from_secs(config.limits.read_timeout_secs);
    let data = if is_stdio(path) {
        harp_core::io::read_capped(tokio::io::stdin(), limit, timeout).await
    } else {
        let file = tokio::fs::File::open(path)
            .await
            .with_context(|| format!("opening {}", path.display()))?;
        harp_core::io::read_capped(file, limit, timeout).await
    };
    data.with_context(|| format!("reading {}", display(path)))
}

/// Write `data` to stdout or a file. `private` files are created mode 0600.
async fn write_output(path: &Path, data: &[u8], private: bool) -> Result<()> {
    if is_stdio(path) {
        let mut out = tokio::io::stdout();
        out.write_all(data).await.context("writing stdout")?;
        out.flush().await.context("flushing stdout")?;
        return Ok(());
    }

    let mut options = tokio::fs::OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    if private {
        options.mode(0o600);
    }
    #[cfg(not(unix))]
    let _ = private;

    let mut file = options
        .open(path)
        .await
        .with_context(|| format!("creating {}", path.display()))?;
    file.write_all(data)
        .await
        .with_context(|| format!("writing {}", path.display()))?;
    file.flush().await?;
    Ok(())
}

fn display(path: &Path) -> String {
    if is_stdio(path) {
        "stdin".into()
    } else {
        path.display().to_string()
    }
}

async fn load_identity_files(paths: &[PathBuf]) -> Result<Vec<IdentityFile>> {
    let mut files = Vec::with_capacity(paths.len());
    for path in paths {
        let data = tokio::fs::read(path)
            .await
            .with_context(|| format!("reading identity {}", path.display()))?;
        let file = IdentityFile::from_json(&data)
            .with_context(|| format!("parsing identity {}", path.display()))?;
        files.push(file);
    }
    Ok(files)
}

// ── Passphrase prompt ─────────────────────────────────────────────────────────

/// Reads passphrases from the controlling terminal without echo.
struct TerminalPrompt;

impl SecretPrompt for TerminalPrompt {
    fn read_secret(&self, prompt: &str, confirm: bool) -> HarpResult<SecretString> {
        let first = SecretString::from(rpassword::prompt_password(format!("{prompt}: "))?);
        if confirm {
            if first.expose_secret().is_empty() {
                return Err(HarpError::input("empty passphrase"));
            }
            let second =
                SecretString::from(rpassword::prompt_password(format!("confirm {prompt}: "))?);
            if first.expose_secret() != second.expose_secret() {
                return Err(HarpError::input("passphrases do not match"));
            }
        }
        Ok(first)
    }
}

// ── `harp seal` ───────────────────────────────────────────────────────────────

async fn cmd_seal(config: &HarpConfig, io: &IoArgs, options: &SealOptions) -> Result<()> {
    let input = read_input(config, &io.input).await?;
    let bundle =
        Bundle::from_slice_with(&input, &config.limits.effective()).context("loading bundle")?;
    drop(input);

    let outcome = seal(&bundle, options).context("sealing bundle")?;
    write_output(&io.output, &outcome.container, false).await?;

    match (outcome.metadata, &outcome.container_key) {
        (Some(mut metadata), key) => {
            if let (Some(map), Some(key)) = (metadata.as_object_mut(), key) {
                map.insert(
                    "container_key".into(),
                    serde_json::Value::String(key.expose_secret().to_string()),
                );
            }
            eprintln!("{}", serde_json::to_string_pretty(&metadata)?);
        }
        (None, Some(key)) => {
            eprintln!("Container key (keep it safe, it opens this container):");
            eprintln!("{}", key.expose_secret());
        }
        (None, None) => {}
    }
    Ok(())
}

// ── `harp unseal` ─────────────────────────────────────────────────────────────

async fn unseal_key(
    key: Option<String>,
    identities: &[PathBuf],
    identity_transformer: Option<String>,
    dckd: &DckdArgs,
) -> Result<UnsealKey> {
    let seed = dckd.seed()?;
    let chosen = [key.is_some(), !identities.is_empty(), seed.is_some()]
        .iter()
        .filter(|set| **set)
        .count();
    if chosen != 1 {
        anyhow::bail!("pass exactly one of --key, --identity, or --dckd-master-key/--dckd-target");
    }

    if let Some(key) = key {
        return Ok(UnsealKey::KeyString(SecretString::from(key)));
    }
    if let Some(seed) = seed {
        return Ok(UnsealKey::Dckd(seed));
    }

    let files = load_identity_files(identities).await?;
    match identity_transformer {
        Some(transformer) => {
            let wrap = KeyWrap::Transformer(SecretString::from(transformer));
            let keys = files
                .iter()
                .map(|file| identity_recover(file, &wrap))
                .collect::<HarpResult<Vec<IdentityKey>>>()
                .context("unlocking identity files")?;
            Ok(UnsealKey::Identities(keys))
        }
        None => Ok(UnsealKey::IdentityFiles(files)),
    }
}

async fn cmd_unseal(
    config: &HarpConfig,
    io: &IoArgs,
    key: UnsealKey,
    protection: Option<ProtectionOptions>,
) -> Result<()> {
    let container = read_input(config, &io.input).await?;

    let prompt = TerminalPrompt;
    let mut options = UnsealOptions::new(key)
        .with_prompt(&prompt)
        .with_limits(config.limits.effective());
    if let Some(protection) = protection {
        options = options.with_protection(protection);
    }

    let bundle = unseal(&container, &options).context("unsealing container")?;
    let bytes = bundle.to_canonical_bytes()?;
    write_output(&io.output, &bytes, true).await
}

// ── `harp identity` ───────────────────────────────────────────────────────────

async fn cmd_identity_new(
    config: &HarpConfig,
    description: &str,
    version: Option<&str>,
    output: &Path,
    transformer: Option<String>,
) -> Result<()> {
    let fips = harp_core::fips::enabled();
    let version = match version {
        Some(v) => v.parse::<IdentityVersion>()?,
        None if fips => IdentityVersion::default_for(true),
        None => config
            .identity
            .default_version
            .parse::<IdentityVersion>()
            .context("config identity.default_version")?,
    };

    let wrap = match transformer {
        Some(key) => KeyWrap::Transformer(SecretString::from(key)),
        None => KeyWrap::Passphrase {
            passphrase: TerminalPrompt.read_secret("identity passphrase", true)?,
            iterations: config.identity.pbes2_iterations,
        },
    };

    let (file, key) = identity_new(description, version, &wrap).context("creating identity")?;
    drop(key);

    let mut json = file.to_json()?;
    json.push(b'\n');
    write_output(output, &json, true).await?;

    eprintln!("Recipient: {}", file.recipient()?);
    Ok(())
}

async fn cmd_identity_recover(
    config: &HarpConfig,
    input: &Path,
    transformer: Option<String>,
) -> Result<()> {
    let data = read_input(config, input).await?;
    let file = IdentityFile::from_json(&data).context("parsing identity file")?;

    let key = match transformer {
        Some(key) => identity_recover(&file, &KeyWrap::Transformer(SecretString::from(key)))?,
        None => file.recover_with_prompt(&TerminalPrompt)?,
    };
    let text = key.to_key_string();
    let line = Zeroizing::new(format!("{}\n", text.expose_secret()));
    write_output(Path::new("-"), line.as_bytes(), true).await
}

// ── `harp bundle` ─────────────────────────────────────────────────────────────

async fn cmd_bundle(
    config: &HarpConfig,
    io: &IoArgs,
    protection: &ProtectionOptions,
    direction: Direction,
) -> Result<()> {
    let input = read_input(config, &io.input).await?;
    let bundle =
        Bundle::from_slice_with(&input, &config.limits.effective()).context("loading bundle")?;
    drop(input);

    let out = match direction {
        Direction::Encode => harp_bundle::encrypt(&bundle, protection)?,
        Direction::Decode => harp_bundle::decrypt(&bundle, protection)?,
    };
    let bytes = out.to_canonical_bytes()?;
    write_output(&io.output, &bytes, direction == Direction::Decode).await
}

// ── `harp transform` ──────────────────────────────────────────────────────────

async fn cmd_transform(config: &HarpConfig, args: TransformArgs, direction: Direction) -> Result<()> {
    let input = read_input(config, &args.io.input).await?;
    let ctx = match &args.aad {
        Some(aad) => TransformContext::with_aad(aad.as_bytes()),
        None => TransformContext::default(),
    };
    let key = SecretString::from(args.key);

    let mut output = Vec::new();
    harp_crypto::transform_stream(direction, key.expose_secret(), &ctx, &input[..], &mut output)
        .with_context(|| format!("transform {direction:?}"))?;
    write_output(&args.io.output, &output, direction == Direction::Decode).await
}

// ── `harp keygen` ─────────────────────────────────────────────────────────────

fn cmd_keygen(kind: Option<&str>, list: bool) -> Result<()> {
    if list {
        for kind in keygen::KINDS {
            println!("{kind}");
        }
        return Ok(());
    }
    let kind = kind.context("missing key kind (see `harp keygen --list`)")?;
    let key = keygen::generate(kind)?;
    println!("{}", key.expose_secret());
    Ok(())
}
