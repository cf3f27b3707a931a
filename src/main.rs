// Copyright 2026 Daniel Pelikan
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Headless host: connects to the dongle and types stdin lines on the
//! remote machine.
//!
//! Lines starting with `/` are commands: `/ctrl-alt-del`, `/ctrl-alt-t`,
//! `/meta-tab`, `/release`, `/clear`, `/scan`, `/disconnect`, `/status`.

use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, info_span, warn};
use tracing_subscriber::EnvFilter;

use remote_input::bluetooth::{
    event_channel, BluezTransport, ConnectionState, LinkService, LinkSnapshot,
};
use remote_input::config::Config;
use remote_input::events::{Combo, EventProcessor, InputEvent};
use remote_input::report::ReportController;

/// How long shutdown waits for the link to drop.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

/// Pause before restarting a scan that ended on its own.
const RESCAN_DELAY: Duration = Duration::from_secs(1);

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("remote_input=info")),
        )
        .init();

    info!("Starting remote-input v{}", env!("CARGO_PKG_VERSION"));

    let config = Config::load_default().context("Failed to load configuration")?;

    let (event_tx, event_rx) = event_channel();
    let transport = BluezTransport::new(
        event_tx,
        config.bluetooth.power_on_adapter,
        info_span!("bluez"),
    )
    .await
    .context("Failed to initialize Bluetooth")?;
    let link = Arc::new(LinkService::new(
        Arc::new(transport),
        config.link_options(),
        info_span!("link"),
    ));
    let link_task = tokio::spawn(link.clone().run(event_rx));
    let rescan_task = tokio::spawn(rescan_when_idle(link.clone()));

    let controller = Arc::new(ReportController::new(
        link.clone(),
        config.reports.queue_capacity,
        info_span!("reports"),
    ));
    let drain = controller.spawn_drain(config.drain_interval());
    let mut processor = EventProcessor::new(controller.clone());

    info!("Type text to send it; lines starting with '/' are commands");
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line.context("Failed to read stdin")? else {
                    break;
                };
                handle_line(&line, &link, &controller, &mut processor);
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted");
                break;
            }
        }
    }

    info!("Shutting down");
    processor.process_event(InputEvent::ClearQueue);
    drain.stop().await;
    rescan_task.abort();
    link.disconnect();
    let mut updates = link.subscribe();
    let disconnected = updates.wait_for(|s| s.state == ConnectionState::Disconnected);
    if tokio::time::timeout(SHUTDOWN_GRACE, disconnected).await.is_err() {
        warn!("Link still up after {:?}, exiting anyway", SHUTDOWN_GRACE);
    }
    link_task.abort();
    Ok(())
}

fn handle_line(
    line: &str,
    link: &LinkService,
    controller: &ReportController,
    processor: &mut EventProcessor,
) {
    let Some(command) = line.strip_prefix('/') else {
        processor.process_event(InputEvent::Paste(format!("{}\n", line)));
        return;
    };

    match command.trim() {
        "release" => processor.process_event(InputEvent::ReleaseAll),
        "clear" => processor.process_event(InputEvent::ClearQueue),
        "scan" => link.start_scanning(),
        "disconnect" => link.disconnect(),
        "status" => print_status(&link.snapshot(), controller.queue_depth()),
        other => match Combo::parse(other) {
            Some(combo) => processor.process_event(InputEvent::Combo(combo)),
            None => warn!("Unknown command: /{}", other),
        },
    }
}

fn print_status(snapshot: &LinkSnapshot, queue_depth: usize) {
    info!(
        "powered={} scanning={} state={:?} device={} queue={}",
        snapshot.powered,
        snapshot.scanning,
        snapshot.state,
        snapshot
            .active
            .as_ref()
            .map_or("-", |device| device.display_name()),
        queue_depth
    );
    for device in &snapshot.discovered {
        info!("  discovered: {} ({})", device.display_name(), device.id);
    }
}

/// Keep scanning whenever the adapter is up and no link is in progress.
async fn rescan_when_idle(link: Arc<LinkService>) {
    let mut updates = link.subscribe();
    loop {
        if is_idle(&updates.borrow_and_update()) {
            // A scan that keeps failing must not spin.
            tokio::time::sleep(RESCAN_DELAY).await;
            if is_idle(&link.snapshot()) {
                link.start_scanning();
            }
        }
        if updates.changed().await.is_err() {
            break;
        }
    }
}

fn is_idle(snapshot: &LinkSnapshot) -> bool {
    snapshot.powered && !snapshot.scanning && snapshot.state == ConnectionState::Disconnected
}
