//! CosmicCipher CLI
//!
//! Drives the engine through the demo sequence with per-step timings and
//! prints the effective configuration.

use clap::{Parser, Subcommand};
use console::{style, Emoji};
use cosmiccipher_core::wire::to_base64;
use cosmiccipher_core::Engine;
use serde::Serialize;
use std::path::PathBuf;
use std::time::Instant;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

mod config;

use config::CliConfig;

static LOCK: Emoji<'_, '_> = Emoji("🔐 ", "");
static CHECK: Emoji<'_, '_> = Emoji("✅ ", "[OK] ");
static KEY: Emoji<'_, '_> = Emoji("🔑 ", "[KEY] ");

/// CosmicCipher - identity and session protocol engine
#[derive(Parser)]
#[command(name = "cosmiccipher")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Configuration file path (TOML)
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the create/export/import/instance/handshake/encrypt sequence
    Demo {
        /// Export password
        #[arg(short, long, default_value = "test")]
        password: String,

        /// Message Bob sends to Alice
        #[arg(short, long, default_value = "Hello Alice!")]
        message: String,

        /// Print the report as JSON
        #[arg(long)]
        json: bool,
    },

    /// Print the effective configuration
    Config,
}

/// One timed step
#[derive(Serialize)]
struct Step {
    name: &'static str,
    millis: f64,
}

/// Demo outcome
#[derive(Serialize)]
struct DemoReport {
    started_at: String,
    steps: Vec<Step>,
    ciphertext: String,
    plaintext: String,
    alice_fingerprint: String,
    bob_fingerprint: String,
    bob_send_key: String,
    alice_receive_key: String,
}

struct Timer {
    steps: Vec<Step>,
}

impl Timer {
    fn new() -> Self {
        Self { steps: Vec::new() }
    }

    fn time<T>(&mut self, name: &'static str, f: impl FnOnce() -> T) -> T {
        let start = Instant::now();
        let out = f();
        let millis = start.elapsed().as_secs_f64() * 1000.0;
        debug!("{} took {:.3} ms", name, millis);
        self.steps.push(Step { name, millis });
        out
    }
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let default_level = if cli.verbose { "debug" } else { "warn" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .without_time()
        .init();

    let config = CliConfig::load(cli.config.as_deref())?;

    match cli.command {
        Commands::Demo {
            password,
            message,
            json,
        } => run_demo(config, &password, &message, json)?,
        Commands::Config => print!("{}", config.to_toml()?),
    }

    Ok(())
}

fn run_demo(config: CliConfig, password: &str, message: &str, json: bool) -> anyhow::Result<()> {
    let engine = Engine::new(config.engine)?;
    let bob = "bob";
    let alice = "alice";

    if !json {
        println!("{} Running CosmicCipher demo...", LOCK);
    }
    info!("Demo started");

    let started_at = chrono::Utc::now().to_rfc3339();
    let mut timer = Timer::new();

    timer.time("Creation", || engine.new_user(bob))?;
    let exported = timer.time("Export", || engine.export_user(bob, password))?;
    engine.delete_user(bob)?;
    timer.time("Import", || engine.import_user(bob, password, &exported))?;
    engine.new_user(alice)?;

    let instance = timer.time("Instance", || engine.generate_instance(bob))?;
    timer.time("Import instance", || engine.import_instance(alice, &instance))?;

    let kex_packet_bob = timer.time("Init DH KEX (bob)", || engine.init_dh_kex(bob, alice))?;
    let kex_packet_alice = timer.time("Init DH KEX (alice)", || engine.init_dh_kex(alice, bob))?;
    timer.time("Finalize DH KEX (alice)", || {
        engine.finalize_dh_kex(alice, bob, &kex_packet_bob)
    })?;
    timer.time("Finalize DH KEX (bob)", || {
        engine.finalize_dh_kex(bob, alice, &kex_packet_alice)
    })?;

    let encrypted = timer.time("Encrypt", || engine.encrypt(bob, alice, message.as_bytes()))?;
    let decrypted = timer.time("Decrypt", || engine.decrypt(alice, bob, &encrypted))?;
    debug!("Ciphertext header: {}", hex::encode(&encrypted[..4.min(encrypted.len())]));

    let bob_keys = engine.session_key_fingerprints(bob, alice)?;
    let alice_keys = engine.session_key_fingerprints(alice, bob)?;

    let report = DemoReport {
        started_at,
        steps: timer.steps,
        ciphertext: to_base64(&encrypted),
        plaintext: String::from_utf8_lossy(&decrypted).into_owned(),
        alice_fingerprint: engine.identity_info(alice)?.fingerprint,
        bob_fingerprint: engine.identity_info(bob)?.fingerprint,
        bob_send_key: bob_keys.send,
        alice_receive_key: alice_keys.receive,
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    for step in &report.steps {
        println!(
            "  {:<26} {}",
            step.name,
            style(format!("{:>10.3} ms", step.millis)).cyan()
        );
    }
    println!();
    println!("  {} Alice: {}", KEY, style(&report.alice_fingerprint[..32]).yellow());
    println!("  {} Bob:   {}", KEY, style(&report.bob_fingerprint[..32]).yellow());
    println!("  Bob send key:      {}", style(&report.bob_send_key).magenta());
    println!("  Alice receive key: {}", style(&report.alice_receive_key).magenta());
    println!("  Encrypted: {}", style(&report.ciphertext).dim());
    println!("{} Decrypted: {}", CHECK, style(&report.plaintext).green());

    Ok(())
}
