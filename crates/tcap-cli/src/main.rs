//! tcap: time-capsule vault CLI
//!
//! Identity commands:
//!   identity new | show           - create or display this user's key pair
//!   identity export | import      - password-protected backup artifact
//!   identity split | combine      - Shamir shares of a backup for trustees
//!
//! Capsule commands:
//!   capsule create | list | show
//!   capsule schedule | deliver | unlock | open | delete
//!
//! Maintenance:
//!   sweep                         - purge self-destructed capsules, deliver due ones
//!   config show                   - display current configuration

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use secrecy::{ExposeSecret, SecretString};
use std::collections::HashSet;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tcap_core::config::expand_tilde;
use tcap_core::{GeoPoint, Recipient, SelfDestructPolicy, TcapConfig, TimeCapsule, Visibility};
use tcap_crypto::{
    combine_shares, generate_identity_key_pair, split_secret, ContentItem, ContentKind,
    IdentityBackup, IdentityKeyPair, Share,
};
use tcap_vault::{
    CapsuleService, Clock, ConditionSources, ConditionSpec, CreateCapsuleParams,
    JsonFileRepository, SystemClock,
};

// ── CLI structure ──────────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(
    name = "tcap",
    version,
    about = "Time-capsule vault client",
    long_about = "tcap: seal content for recipients, deliver it when conditions are met"
)]
struct Cli {
    /// Path to tcap.toml configuration file
    #[arg(
        long,
        short = 'c',
        env = "TCAP_CONFIG",
        default_value = "~/.config/tcap/config.toml"
    )]
    config: PathBuf,

    /// Capsule store JSON file (overrides config)
    #[arg(long, env = "TCAP_STORE", global = true)]
    store: Option<PathBuf>,

    /// Identity key file (overrides config)
    #[arg(long, env = "TCAP_IDENTITY", global = true)]
    identity: Option<PathBuf>,

    /// Act as this user id (overrides config)
    #[arg(long, short = 'u', env = "TCAP_USER", global = true)]
    user: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "TCAP_LOG", default_value = "warn", global = true)]
    log: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Identity key pair management
    Identity {
        #[command(subcommand)]
        action: IdentityAction,
    },

    /// Capsule operations
    Capsule {
        #[command(subcommand)]
        action: CapsuleAction,
    },

    /// Purge self-destructed capsules and deliver those whose conditions are met
    Sweep {
        /// Event ids to treat as confirmed
        #[arg(long = "event")]
        events: Vec<String>,
        /// Biometric challenge ids to treat as asserted
        #[arg(long = "biometric")]
        biometrics: Vec<String>,
        /// Current position as "LAT,LON"
        #[arg(long, value_parser = parse_position)]
        position: Option<GeoPoint>,
    },

    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand, Debug)]
enum IdentityAction {
    /// Generate a new key pair and write it to the identity file
    New {
        /// Replace an existing identity file
        #[arg(long)]
        force: bool,
    },
    /// Print the public key
    Show,
    /// Write a password-protected backup of the identity
    Export {
        /// Backup file to write
        out: PathBuf,
    },
    /// Restore the identity from a backup
    Import {
        /// Backup file to read
        backup: PathBuf,
        /// Replace an existing identity file
        #[arg(long)]
        force: bool,
    },
    /// Split a backup file into Shamir shares
    Split {
        /// Backup file to split
        backup: PathBuf,
        /// Shares required to restore
        #[arg(long, short = 't')]
        threshold: u8,
        /// Shares to produce
        #[arg(long, short = 'n')]
        shares: u8,
    },
    /// Rebuild a backup file from shares
    Combine {
        /// Backup file to write
        #[arg(long, short = 'o')]
        out: PathBuf,
        /// Encoded shares (tcap-share-v1:…)
        #[arg(required = true)]
        shares: Vec<String>,
    },
}

#[derive(Subcommand, Debug)]
enum CapsuleAction {
    /// Seal content into a new capsule
    Create(CreateArgs),
    /// List capsules you created or received
    List {
        /// List public capsules instead
        #[arg(long)]
        public: bool,
    },
    /// Show capsule details and audit trail
    Show { id: String },
    /// Move a draft to scheduled
    Schedule { id: String },
    /// Deliver a scheduled capsule now
    Deliver { id: String },
    /// Check a capsule password
    Unlock { id: String },
    /// Open a delivered capsule and decrypt its contents
    Open {
        id: String,
        /// Prompt for the capsule password first
        #[arg(long)]
        password: bool,
        /// Directory to write file items into
        #[arg(long, short = 'o')]
        out: Option<PathBuf>,
    },
    /// Delete a capsule you created
    Delete { id: String },
}

#[derive(Subcommand, Debug)]
enum ConfigAction {
    /// Print the active configuration (merged defaults + config file)
    Show,
}

#[derive(Args, Debug)]
struct CreateArgs {
    #[arg(long)]
    title: String,
    #[arg(long)]
    description: Option<String>,
    /// Text item (repeatable)
    #[arg(long = "text")]
    texts: Vec<String>,
    /// File item (repeatable)
    #[arg(long = "file")]
    files: Vec<PathBuf>,
    /// Recipient as ID[:NAME]=AGE_PUBLIC_KEY (repeatable)
    #[arg(long = "recipient", value_parser = parse_recipient)]
    recipients: Vec<Recipient>,
    /// Deliver at this Unix timestamp
    #[arg(long)]
    deliver_at: Option<u64>,
    /// Deliver this many seconds from now
    #[arg(long)]
    deliver_in: Option<u64>,
    /// Deliver within a radius, as "LAT,LON,RADIUS_METERS"
    #[arg(long, value_parser = parse_location)]
    location: Option<(GeoPoint, f64)>,
    /// Deliver once this event is confirmed (repeatable)
    #[arg(long = "event")]
    events: Vec<String>,
    /// Deliver once this biometric challenge is asserted (repeatable)
    #[arg(long = "biometric")]
    biometrics: Vec<String>,
    /// Require a password to open (prompted)
    #[arg(long)]
    password: bool,
    /// Erase the capsule this many seconds after it is first opened
    #[arg(long)]
    self_destruct: Option<u64>,
    #[arg(long, value_enum, default_value = "recipients")]
    visibility: VisibilityArg,
    /// Hide the creator from recipients
    #[arg(long)]
    anonymous: bool,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum VisibilityArg {
    Private,
    Recipients,
    Public,
}

impl From<VisibilityArg> for Visibility {
    fn from(v: VisibilityArg) -> Self {
        match v {
            VisibilityArg::Private => Visibility::Private,
            VisibilityArg::Recipients => Visibility::Recipients,
            VisibilityArg::Public => Visibility::Public,
        }
    }
}

// ── Entry point ───────────────────────────────────────────────────────────────

struct Ctx {
    config: TcapConfig,
    config_path: PathBuf,
    store: PathBuf,
    key_file: PathBuf,
    user: Option<String>,
}

impl Ctx {
    fn service(&self) -> CapsuleService<JsonFileRepository, SystemClock> {
        CapsuleService::new(JsonFileRepository::open(&self.store), SystemClock)
            .with_kdf_params(self.config.crypto.kdf_params())
    }

    fn user(&self) -> Result<&str> {
        self.user
            .as_deref()
            .context("no user id; pass --user or set identity.user_id in config")
    }

    fn identity(&self) -> Result<IdentityKeyPair> {
        read_identity_file(&self.key_file)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(&cli.log);

    let config_path = expand_tilde(&cli.config);
    let config = TcapConfig::load_or_default(&config_path)
        .with_context(|| format!("loading config {}", config_path.display()))?;

    let ctx = Ctx {
        store: expand_tilde(cli.store.as_deref().unwrap_or(&config.store.path)),
        key_file: expand_tilde(cli.identity.as_deref().unwrap_or(&config.identity.key_file)),
        user: cli.user.or_else(|| config.identity.user_id.clone()),
        config_path,
        config,
    };
    tracing::debug!(
        store = %ctx.store.display(),
        identity = %ctx.key_file.display(),
        "tcap starting"
    );

    match cli.command {
        Commands::Identity { action } => match action {
            IdentityAction::New { force } => cmd_identity_new(&ctx, force).await,
            IdentityAction::Show => cmd_identity_show(&ctx),
            IdentityAction::Export { out } => cmd_identity_export(&ctx, &out).await,
            IdentityAction::Import { backup, force } => {
                cmd_identity_import(&ctx, &backup, force).await
            }
            IdentityAction::Split {
                backup,
                threshold,
                shares,
            } => cmd_identity_split(&backup, threshold, shares),
            IdentityAction::Combine { out, shares } => cmd_identity_combine(&shares, &out),
        },
        Commands::Capsule { action } => match action {
            CapsuleAction::Create(args) => cmd_capsule_create(&ctx, args).await,
            CapsuleAction::List { public } => cmd_capsule_list(&ctx, public),
            CapsuleAction::Show { id } => cmd_capsule_show(&ctx, &id),
            CapsuleAction::Schedule { id } => {
                let capsule = ctx.service().schedule(&id)?;
                println!("{}: {}", capsule.id, capsule.status);
                Ok(())
            }
            CapsuleAction::Deliver { id } => {
                let capsule = ctx.service().mark_delivered(&id)?;
                println!("{}: {}", capsule.id, capsule.status);
                Ok(())
            }
            CapsuleAction::Unlock { id } => cmd_capsule_unlock(&ctx, &id).await,
            CapsuleAction::Open { id, password, out } => {
                cmd_capsule_open(&ctx, &id, password, out.as_deref()).await
            }
            CapsuleAction::Delete { id } => cmd_capsule_delete(&ctx, &id),
        },
        Commands::Sweep {
            events,
            biometrics,
            position,
        } => cmd_sweep(&ctx, events, biometrics, position),
        Commands::Config {
            action: ConfigAction::Show,
        } => cmd_config_show(&ctx),
    }
}

fn init_logging(level: &str) {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

// ── Argument parsers ──────────────────────────────────────────────────────────

fn parse_recipient(s: &str) -> Result<Recipient, String> {
    let (who, public_key) = s
        .split_once('=')
        .ok_or_else(|| format!("expected ID[:NAME]=AGE_PUBLIC_KEY, got {s:?}"))?;
    let (id, name) = who.split_once(':').unwrap_or((who, who));
    if id.is_empty() || public_key.is_empty() {
        return Err(format!("expected ID[:NAME]=AGE_PUBLIC_KEY, got {s:?}"));
    }
    Ok(Recipient::new(id, name, public_key))
}

fn parse_coords(parts: &[&str]) -> Result<GeoPoint, String> {
    let latitude: f64 = parts[0].trim().parse().map_err(|e| format!("latitude: {e}"))?;
    let longitude: f64 = parts[1]
        .trim()
        .parse()
        .map_err(|e| format!("longitude: {e}"))?;
    Ok(GeoPoint {
        latitude,
        longitude,
    })
}

fn parse_position(s: &str) -> Result<GeoPoint, String> {
    let parts: Vec<&str> = s.split(',').collect();
    if parts.len() != 2 {
        return Err(format!("expected LAT,LON, got {s:?}"));
    }
    parse_coords(&parts)
}

fn parse_location(s: &str) -> Result<(GeoPoint, f64), String> {
    let parts: Vec<&str> = s.split(',').collect();
    if parts.len() != 3 {
        return Err(format!("expected LAT,LON,RADIUS_METERS, got {s:?}"));
    }
    let point = parse_coords(&parts[..2])?;
    let radius: f64 = parts[2].trim().parse().map_err(|e| format!("radius: {e}"))?;
    Ok((point, radius))
}

fn guess_mime(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase);
    match ext.as_deref() {
        Some("txt") | Some("md") => "text/plain",
        Some("json") => "application/json",
        Some("png") => "image/png",
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("gif") => "image/gif",
        Some("pdf") => "application/pdf",
        Some("mp3") => "audio/mpeg",
        Some("mp4") => "video/mp4",
        _ => "application/octet-stream",
    }
}

// ── Identity files and prompts ────────────────────────────────────────────────

fn write_identity_file(path: &Path, identity: &IdentityKeyPair) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("creating identity dir: {}", parent.display()))?;
    }

    let mut opts = std::fs::OpenOptions::new();
    opts.write(true).create(true).truncate(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        opts.mode(0o600);
    }
    let mut file = opts
        .open(path)
        .with_context(|| format!("opening identity file: {}", path.display()))?;
    // mode() only applies on create; an overwritten file keeps its old bits
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        file.set_permissions(std::fs::Permissions::from_mode(0o600))
            .with_context(|| format!("restricting identity file: {}", path.display()))?;
    }

    let secret = identity.secret_key();
    writeln!(file, "# public key: {}", identity.public_key())?;
    file.write_all(secret.expose_secret().as_bytes())?;
    writeln!(file)?;
    Ok(())
}

fn read_identity_file(path: &Path) -> Result<IdentityKeyPair> {
    let content = std::fs::read_to_string(path).with_context(|| {
        format!(
            "reading identity file {} (run `tcap identity new` first)",
            path.display()
        )
    })?;
    let line = content
        .lines()
        .map(str::trim)
        .find(|l| l.starts_with("AGE-SECRET-KEY-"))
        .with_context(|| format!("no secret key in {}", path.display()))?;
    Ok(IdentityKeyPair::from_secret_key(&SecretString::from(
        line.to_owned(),
    ))?)
}

fn prompt_password(prompt: &str) -> Result<SecretString> {
    let password = rpassword::prompt_password(prompt).context("reading password")?;
    Ok(SecretString::from(password))
}

fn prompt_new_password() -> Result<SecretString> {
    let first = prompt_password("New password: ")?;
    let second = prompt_password("Repeat password: ")?;
    if first.expose_secret().is_empty() {
        bail!("password must not be empty");
    }
    if first.expose_secret() != second.expose_secret() {
        bail!("passwords do not match");
    }
    Ok(first)
}

// ── `tcap identity …` ─────────────────────────────────────────────────────────

async fn cmd_identity_new(ctx: &Ctx, force: bool) -> Result<()> {
    if ctx.key_file.exists() && !force {
        bail!(
            "identity already exists at {} (use --force to replace it)",
            ctx.key_file.display()
        );
    }
    let identity = generate_identity_key_pair().await?;
    write_identity_file(&ctx.key_file, &identity)?;
    eprintln!("identity written to {}", ctx.key_file.display());
    println!("{}", identity.public_key());
    Ok(())
}

fn cmd_identity_show(ctx: &Ctx) -> Result<()> {
    println!("{}", ctx.identity()?.public_key());
    Ok(())
}

async fn cmd_identity_export(ctx: &Ctx, out: &Path) -> Result<()> {
    let identity = ctx.identity()?;
    let password = prompt_new_password()?;
    let params = ctx.config.crypto.kdf_params();

    let backup =
        tokio::task::spawn_blocking(move || identity.export_backup(&password, &params)).await??;
    std::fs::write(out, backup.to_json()?)
        .with_context(|| format!("writing backup: {}", out.display()))?;
    eprintln!("backup written to {}", out.display());
    Ok(())
}

async fn cmd_identity_import(ctx: &Ctx, backup_path: &Path, force: bool) -> Result<()> {
    if ctx.key_file.exists() && !force {
        bail!(
            "identity already exists at {} (use --force to replace it)",
            ctx.key_file.display()
        );
    }
    let raw = std::fs::read_to_string(backup_path)
        .with_context(|| format!("reading backup: {}", backup_path.display()))?;
    let backup = IdentityBackup::from_json(&raw)?;
    let password = prompt_password("Backup password: ")?;

    let identity = tokio::task::spawn_blocking(move || backup.import(&password))
        .await?
        .context("wrong password or damaged backup")?;
    write_identity_file(&ctx.key_file, &identity)?;
    println!("{}", identity.public_key());
    Ok(())
}

fn cmd_identity_split(backup_path: &Path, threshold: u8, share_count: u8) -> Result<()> {
    let raw = std::fs::read(backup_path)
        .with_context(|| format!("reading backup: {}", backup_path.display()))?;
    let shares = split_secret(&raw, threshold, share_count)?;

    eprintln!("{share_count} shares; any {threshold} restore the backup");
    for share in &shares {
        println!("{}", share.encode());
    }
    Ok(())
}

fn cmd_identity_combine(encoded: &[String], out: &Path) -> Result<()> {
    let shares = encoded
        .iter()
        .map(|s| Share::decode(s.trim()))
        .collect::<Result<Vec<_>, _>>()?;
    let secret = combine_shares(&shares)?;

    let json = std::str::from_utf8(&secret).context("combined shares are not a backup file")?;
    IdentityBackup::from_json(json).context("combined shares are not a backup file")?;
    std::fs::write(out, json).with_context(|| format!("writing backup: {}", out.display()))?;
    eprintln!("backup written to {}", out.display());
    Ok(())
}

// ── `tcap capsule …` ──────────────────────────────────────────────────────────

async fn cmd_capsule_create(ctx: &Ctx, args: CreateArgs) -> Result<()> {
    let user = ctx.user()?;
    let identity = ctx.identity()?;

    let mut contents: Vec<ContentItem> = args.texts.into_iter().map(ContentItem::text).collect();
    for path in &args.files {
        let data =
            std::fs::read(path).with_context(|| format!("reading {}", path.display()))?;
        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("file")
            .to_owned();
        contents.push(ContentItem::file(name, guess_mime(path), data));
    }

    let mut conditions = Vec::new();
    if let Some(target_timestamp) = args.deliver_at {
        conditions.push(ConditionSpec::Date { target_timestamp });
    }
    if let Some(secs) = args.deliver_in {
        conditions.push(ConditionSpec::Date {
            target_timestamp: SystemClock.now().saturating_add(secs),
        });
    }
    if let Some((point, radius_meters)) = args.location {
        conditions.push(ConditionSpec::Location {
            latitude: point.latitude,
            longitude: point.longitude,
            radius_meters,
        });
    }
    conditions.extend(
        args.events
            .into_iter()
            .map(|event_id| ConditionSpec::Event { event_id }),
    );
    conditions.extend(
        args.biometrics
            .into_iter()
            .map(|challenge_id| ConditionSpec::Biometric { challenge_id }),
    );
    if args.password {
        conditions.push(ConditionSpec::Password {
            password: prompt_new_password()?,
        });
    }

    let params = CreateCapsuleParams {
        title: args.title,
        description: args.description,
        contents,
        recipients: args.recipients,
        conditions,
        self_destruct: args.self_destruct.map(|delay_seconds| SelfDestructPolicy {
            enabled: true,
            delay_seconds,
        }),
        visibility: args.visibility.into(),
        is_anonymous: args.anonymous,
    };

    let capsule = ctx
        .service()
        .create_capsule(user, identity.public_key(), params)
        .await?;
    println!("{}", capsule.id);
    eprintln!(
        "status: {}  items: {}  recipients: {}",
        capsule.status,
        capsule.contents.len(),
        capsule.recipients.len()
    );
    Ok(())
}

fn print_capsule_row(capsule: &TimeCapsule) {
    println!(
        "{:<36}  {:<9}  {}",
        capsule.id,
        capsule.status.as_str(),
        capsule.title
    );
}

fn cmd_capsule_list(ctx: &Ctx, public: bool) -> Result<()> {
    let mut svc = ctx.service();
    let capsules = if public {
        svc.get_public_capsules()?
    } else {
        svc.get_capsules_for_user(ctx.user()?)?
    };

    if capsules.is_empty() {
        eprintln!("no capsules");
    }
    for capsule in &capsules {
        print_capsule_row(capsule);
    }
    Ok(())
}

fn cmd_capsule_show(ctx: &Ctx, id: &str) -> Result<()> {
    let capsule = ctx
        .service()
        .get_capsule_by_id(id, ctx.user.as_deref())?
        .with_context(|| format!("capsule {id} not found"))?;
    let viewer_is_creator = ctx.user.as_deref().is_some_and(|u| capsule.is_creator(u));

    println!("Capsule: {}", capsule.id);
    println!("  title:       {}", capsule.title);
    if let Some(description) = &capsule.description {
        println!("  description: {description}");
    }
    if capsule.is_anonymous && !viewer_is_creator {
        println!("  creator:     (anonymous)");
    } else {
        println!("  creator:     {}", capsule.creator_id);
    }
    println!("  status:      {}", capsule.status);
    println!("  visibility:  {:?}", capsule.visibility);
    for recipient in &capsule.recipients {
        println!("  recipient:   {} ({})", recipient.id, recipient.display_name);
    }
    for condition in &capsule.delivery_conditions {
        println!("  condition:   {}", condition.kind());
    }
    for envelope in &capsule.contents {
        match (&envelope.content_type, &envelope.metadata) {
            (ContentKind::File, Some(meta)) => println!(
                "  item:        file {} ({}, {} bytes)",
                meta.name, meta.mime_type, meta.size
            ),
            (kind, _) => println!("  item:        {kind:?}"),
        }
    }
    if let Some(erase_after) = capsule.erase_after {
        println!("  erase after: {erase_after}");
    }

    println!();
    println!("Audit trail:");
    for entry in capsule.audit_trail() {
        let who = match entry.user_id.as_deref() {
            Some(u) if !(capsule.is_anonymous && capsule.is_creator(u) && !viewer_is_creator) => u,
            Some(_) => "(anonymous)",
            None => "-",
        };
        let event = format!("{:?}", entry.event).to_lowercase();
        println!("  {}  {:<9}  {}", entry.timestamp, event, who);
    }
    Ok(())
}

async fn cmd_capsule_unlock(ctx: &Ctx, id: &str) -> Result<()> {
    let user = ctx.user()?;
    let password = prompt_password("Capsule password: ")?;
    ctx.service()
        .verify_capsule_password(id, user, password)
        .await?;
    println!("password accepted");
    Ok(())
}

async fn cmd_capsule_open(
    ctx: &Ctx,
    id: &str,
    with_password: bool,
    out: Option<&Path>,
) -> Result<()> {
    let user = ctx.user()?;
    let identity = ctx.identity()?;
    let mut svc = ctx.service();

    if with_password {
        let password = prompt_password("Capsule password: ")?;
        svc.verify_capsule_password(id, user, password).await?;
    }

    let (capsule, items) = svc.open_capsule(id, user, &identity).await?;
    if items.len() < capsule.contents.len() {
        eprintln!(
            "warning: only {} of {} items could be decrypted",
            items.len(),
            capsule.contents.len()
        );
    }

    for item in &items {
        match (item.as_text(), &item.metadata) {
            (Some(text), _) => println!("{text}"),
            (None, Some(meta)) => {
                let name = Path::new(&meta.name)
                    .file_name()
                    .map(PathBuf::from)
                    .unwrap_or_else(|| PathBuf::from("file"));
                match out {
                    Some(dir) => {
                        std::fs::create_dir_all(dir)?;
                        let dest = dir.join(&name);
                        std::fs::write(&dest, &item.data)
                            .with_context(|| format!("writing {}", dest.display()))?;
                        eprintln!("wrote {}", dest.display());
                    }
                    None => println!(
                        "[file] {} ({}, {} bytes; use --out to save)",
                        name.display(),
                        meta.mime_type,
                        meta.size
                    ),
                }
            }
            (None, None) => println!("[binary] {} bytes", item.data.len()),
        }
    }

    if let Some(erase_after) = capsule.erase_after {
        eprintln!("this capsule self-destructs at {erase_after}");
    }
    Ok(())
}

fn cmd_capsule_delete(ctx: &Ctx, id: &str) -> Result<()> {
    let user = ctx.user()?;
    let mut svc = ctx.service();
    let capsule = svc
        .get_capsule_by_id(id, Some(user))?
        .with_context(|| format!("capsule {id} not found"))?;
    if !capsule.is_creator(user) {
        bail!("only the creator can delete capsule {id}");
    }
    svc.delete_capsule(id)?;
    println!("{id}: deleted");
    Ok(())
}

// ── `tcap sweep` ──────────────────────────────────────────────────────────────

fn cmd_sweep(
    ctx: &Ctx,
    events: Vec<String>,
    biometrics: Vec<String>,
    position: Option<GeoPoint>,
) -> Result<()> {
    let mut sources = ConditionSources::none();
    if !events.is_empty() {
        sources = sources.with_events(Arc::new(events.into_iter().collect::<HashSet<_>>()));
    }
    if !biometrics.is_empty() {
        sources =
            sources.with_biometrics(Arc::new(biometrics.into_iter().collect::<HashSet<_>>()));
    }
    if let Some(position) = position {
        sources = sources.with_position(Arc::new(position));
    }

    let mut svc = ctx.service();
    let purged = svc.purge_expired()?;
    let delivered = svc.sweep_eligible_deliveries(&sources)?;

    for id in &purged {
        println!("{id}: deleted (self-destruct)");
    }
    for capsule in &delivered {
        println!("{}: delivered", capsule.id);
    }
    eprintln!("purged {}, delivered {}", purged.len(), delivered.len());
    Ok(())
}

// ── `tcap config show` ────────────────────────────────────────────────────────

fn cmd_config_show(ctx: &Ctx) -> Result<()> {
    if ctx.config_path.exists() {
        println!("# Configuration from: {}", ctx.config_path.display());
    } else {
        println!(
            "# Configuration: defaults (no file at {})",
            ctx.config_path.display()
        );
    }
    println!();
    let rendered = toml::to_string_pretty(&ctx.config).context("serializing config to TOML")?;
    print!("{rendered}");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_recipient() {
        let r = parse_recipient("bob:Bob Smith=age1xyz").unwrap();
        assert_eq!(r.id, "bob");
        assert_eq!(r.display_name, "Bob Smith");
        assert_eq!(r.public_key, "age1xyz");

        let r = parse_recipient("carol=age1abc").unwrap();
        assert_eq!(r.display_name, "carol");

        assert!(parse_recipient("no-key").is_err());
        assert!(parse_recipient("=age1abc").is_err());
    }

    #[test]
    fn test_parse_location() {
        let (p, radius) = parse_location("48.85,2.35,500").unwrap();
        assert_eq!(p.latitude, 48.85);
        assert_eq!(radius, 500.0);
        assert!(parse_location("48.85,2.35").is_err());
        assert!(parse_position("1,2,3").is_err());
        assert_eq!(parse_position("1, 2").unwrap().longitude, 2.0);
    }

    #[test]
    fn test_guess_mime() {
        assert_eq!(guess_mime(Path::new("a.PNG")), "image/png");
        assert_eq!(guess_mime(Path::new("notes.txt")), "text/plain");
        assert_eq!(guess_mime(Path::new("blob")), "application/octet-stream");
    }

    #[test]
    fn test_identity_file_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("keys/identity.txt");
        let identity = IdentityKeyPair::generate().unwrap();

        write_identity_file(&path, &identity).unwrap();
        let loaded = read_identity_file(&path).unwrap();
        assert_eq!(loaded.public_key(), identity.public_key());

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = std::fs::metadata(&path).unwrap().permissions().mode();
            assert_eq!(mode & 0o777, 0o600);
        }
    }

    #[cfg(unix)]
    #[test]
    fn test_overwrite_tightens_permissions() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("identity.txt");
        std::fs::write(&path, "old").unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o644)).unwrap();

        let identity = IdentityKeyPair::generate().unwrap();
        write_identity_file(&path, &identity).unwrap();

        let mode = std::fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
        assert_eq!(
            read_identity_file(&path).unwrap().public_key(),
            identity.public_key()
        );
    }

    #[test]
    fn test_cli_parses_create() {
        let cli = Cli::try_parse_from([
            "tcap",
            "--user",
            "alice",
            "capsule",
            "create",
            "--title",
            "Hello",
            "--text",
            "hi",
            "--recipient",
            "bob=age1xyz",
            "--deliver-in",
            "60",
            "--visibility",
            "public",
        ])
        .unwrap();
        match cli.command {
            Commands::Capsule {
                action: CapsuleAction::Create(args),
            } => {
                assert_eq!(args.title, "Hello");
                assert_eq!(args.recipients.len(), 1);
                assert_eq!(args.deliver_in, Some(60));
                assert!(matches!(args.visibility, VisibilityArg::Public));
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }
}
