//! `nfclink-sim`: drive a full session against the mock driver.
//!
//! Each scenario brings the stack up, simulates activity in the RF field,
//! prints the resulting events as JSON lines and shuts the stack down.

use std::path::PathBuf;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::{Parser, ValueEnum};
use nfclink_bridge::{DiscoveryMode, Session, SessionConfig, SessionEvent, SessionEvents};
use nfclink_driver::mock::{MockDriver, MockDriverHandle, MockOp};
use nfclink_driver::types::{LinkStatus, RemoteDevice, RemoteDeviceType, RemoteHandle};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Scenario {
    /// Poll for tags and report two of them.
    Reader,
    /// Open a peer link and exchange a frame over a socket.
    Peer,
    /// Select a secure element and report a transaction.
    Card,
}

#[derive(Parser)]
#[command(name = "nfclink-sim", about = "Contactless stack simulator")]
struct Cli {
    /// Scenario to run
    #[arg(short, long, value_enum, default_value = "reader")]
    scenario: Scenario,

    /// Session configuration as JSON
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Print the effective configuration and exit
    #[arg(long)]
    print_config: bool,
}

fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn load_config(path: Option<&PathBuf>) -> Result<SessionConfig> {
    let Some(path) = path else {
        return Ok(SessionConfig::default());
    };
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("invalid configuration in {}", path.display()))
}

fn print_events(events: &mut SessionEvents) -> Result<()> {
    while let Some(event) = events.try_recv() {
        let line = match event {
            SessionEvent::TagDiscovered(tag) => serde_json::json!({ "tag": tag }),
            SessionEvent::PeerDiscovered(peer) => serde_json::json!({ "peer": peer }),
            SessionEvent::TargetDeselected => serde_json::json!({ "deselected": true }),
            SessionEvent::LinkDeactivated => serde_json::json!({ "link": "deactivated" }),
            SessionEvent::Transaction { aid } => serde_json::json!({ "transaction": aid }),
        };
        println!("{}", serde_json::to_string(&line)?);
    }
    Ok(())
}

fn run_reader(session: &Session, field: &MockDriverHandle) -> Result<()> {
    session.enable_discovery(DiscoveryMode::TagReader)?;

    let tags = [
        RemoteDevice::new(RemoteHandle(1), RemoteDeviceType::Mifare)
            .with_uid(vec![0x04, 0x52, 0x8c, 0x1a])
            .with_sak(0x08),
        RemoteDevice::new(RemoteHandle(2), RemoteDeviceType::Felica)
            .with_uid(vec![0x01, 0x2e, 0x45, 0x7b, 0x10, 0x22, 0x3c, 0x0f]),
    ];
    for tag in tags {
        let handle = tag.handle;
        field.discover(vec![tag]);
        field.flush();
        session.disconnect_target(handle)?;
        field.deselect();
    }
    field.flush();
    session.disable_discovery()?;
    Ok(())
}

fn run_peer(session: &Arc<Session>, field: &MockDriverHandle) -> Result<()> {
    let opener = {
        let session = Arc::clone(session);
        thread::spawn(move || session.open_peer_connection(Duration::from_secs(5)))
    };
    while field.count(MockOp::RegisterNotification) == 0 {
        thread::sleep(Duration::from_millis(5));
    }
    field.discover(vec![
        RemoteDevice::new(RemoteHandle(7), RemoteDeviceType::NfcIp1Initiator)
            .with_uid(vec![0x01, 0xfe, 0x88, 0x42])
            .with_general_bytes(vec![0x46, 0x66, 0x6d, 0x01, 0x01, 0x11]),
    ]);
    let device = match opener.join() {
        Ok(result) => result?,
        Err(_) => bail!("open thread panicked"),
    };
    info!("Peer {} in {:?} mode", device.handle, device.mode);

    session.check_link_compliance()?;
    session.activate_link()?;
    field.link_status(LinkStatus::Activated);

    let mut socket = session.create_socket(0, 128, 1, 0)?;
    socket.connect_by_name("urn:nfc:sn:snep", Duration::from_secs(1))?;
    socket.send(b"hello")?;
    info!("Remote MIU {}, RW {}", socket.remote_miu(), socket.remote_rw());

    field.link_status(LinkStatus::Deactivated);
    field.flush();
    info!("Socket {} is {} after link loss", socket.handle(), socket.state());
    Ok(())
}

fn run_card(session: &Session, field: &MockDriverHandle) -> Result<()> {
    session.enable_discovery(DiscoveryMode::CardEmulation)?;
    let secure_elements = session.secure_elements()?;
    let Some(&handle) = secure_elements.first() else {
        bail!("no secure element attached");
    };
    session.select_secure_element(handle)?;
    field.transaction(vec![0xa0, 0x00, 0x00, 0x00, 0x03, 0x10, 0x10]);
    field.flush();
    session.deselect_secure_element(handle)?;
    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging();

    let config = load_config(cli.config.as_ref())?;
    if cli.print_config {
        println!("{}", serde_json::to_string_pretty(&config)?);
        return Ok(());
    }

    let (driver, field) = MockDriver::new();
    field.set_secure_elements(vec![nfclink_driver::types::SecureElement {
        handle: nfclink_driver::types::SecureElementHandle(1),
        kind: nfclink_driver::types::SecureElementKind::Uicc,
    }]);
    let (session, mut events) = Session::new(Arc::new(driver), config);
    let session = Arc::new(session);

    session.initialize().context("stack bring-up failed")?;
    if let Some(capabilities) = session.capabilities() {
        info!("Capabilities: {}", capabilities);
    }

    let outcome = match cli.scenario {
        Scenario::Reader => run_reader(&session, &field),
        Scenario::Peer => run_peer(&session, &field),
        Scenario::Card => run_card(&session, &field),
    };
    print_events(&mut events)?;

    let teardown = session.deinitialize();
    info!("Shutdown: {}", teardown);
    if outcome.is_err() {
        info!("Last driver error: {}", session.last_error());
    }
    outcome
}
