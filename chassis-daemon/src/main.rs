//
// Copyright (c) The chassis-agent Contributors
//
// SPDX-License-Identifier: MIT
//

#![warn(rust_2018_idioms)]

mod config;
mod context;
mod unixctl;

use std::time::Duration;

use chassis_engine::Engine;
use chassis_idl::ofctrl::MemOfCtrl;
use chassis_idl::ovs::MemOvsIdl;
use chassis_idl::sb::MemSbIdl;
use clap::{App, Arg};
use config::{Config, LoggingFmtStyle};
use context::Ctx;
use tracing::level_filters::LevelFilter;
use tracing::{info, warn};
use tracing_subscriber::prelude::*;
use tracing_subscriber::Layer;
use unixctl::UnixctlCommand;

fn init_tracing(config: &config::Logging) {
    let stdout = config.stdout.enabled.then(|| {
        let log_level_filter = LevelFilter::from_level(tracing::Level::TRACE);
        let layer = tracing_subscriber::fmt::layer()
            .with_target(false)
            .with_thread_ids(config.stdout.show_thread_id)
            .with_file(config.stdout.show_source)
            .with_line_number(config.stdout.show_source);
        let layer = match config.stdout.style {
            LoggingFmtStyle::Compact => layer.compact().boxed(),
            LoggingFmtStyle::Full => layer.boxed(),
            LoggingFmtStyle::Json => layer.json().boxed(),
            LoggingFmtStyle::Pretty => layer.pretty().boxed(),
        };
        layer.with_filter(log_level_filter)
    });

    let env_filter = tracing_subscriber::EnvFilter::builder()
        .with_default_directive("chassis_agent=debug".parse().unwrap())
        .from_env_lossy();

    tracing_subscriber::registry().with(env_filter).with(stdout).init();
}

/// One iteration's worth of work: drives the engine, commits whatever it
/// queued, and clears the per-iteration change tracking on both IDL
/// snapshots so the next external delta is seen in isolation.
fn tick(engine: &mut Engine<Ctx>, ctx: &mut Ctx, now_ms: u64) {
    ctx.now_ms = now_ms;
    engine.run_iteration(ctx);
    ctx.sb.snapshot_mut().clear_tracking();
    ctx.ovs.snapshot_mut().clear_tracking();
}

#[tokio::main]
async fn main() {
    let matches = App::new("chassis-agent control plane")
        .version(clap::crate_version!())
        .arg(
            Arg::with_name("config")
                .short("c")
                .long("config")
                .value_name("file")
                .help("Specify an alternative configuration file."),
        )
        .get_matches();

    let config_file = matches.value_of("config");
    let config = Config::load(config_file);

    init_tracing(&config.logging);
    info!(system_id = %config.system_id, "starting up");

    let mut ctx = Ctx::new(
        config.system_id.clone(),
        Box::new(MemSbIdl::new()),
        Box::new(MemOvsIdl::new()),
        Box::new(MemOfCtrl::new()),
        config.mac_binding_age_threshold_ms,
    );
    let mut engine: Engine<Ctx> = Engine::new("tick", context::descriptors());

    let listener = match unixctl::bind(&config.unixctl_path) {
        Ok(listener) => Some(listener),
        Err(err) => {
            warn!(%err, path = %config.unixctl_path, "failed to bind unixctl socket, commands disabled");
            None
        }
    };

    let mut probe = tokio::time::interval(Duration::from_millis(config.remote_probe_interval_ms.max(1)));
    let mut now_ms: u64 = 0;

    info!("entering main loop");
    loop {
        tokio::select! {
            _ = probe.tick() => {
                now_ms += config.remote_probe_interval_ms.max(1);
                tick(&mut engine, &mut ctx, now_ms);
            }
            cmd = accept_unixctl(listener.as_ref()) => {
                let Some((cmd, mut stream)) = cmd else { continue };
                match cmd {
                    UnixctlCommand::Exit { restart } => {
                        info!(restart, "exit requested over unixctl");
                        unixctl::reply(&mut stream, "exiting").await;
                        return;
                    }
                    UnixctlCommand::ConnectionStatus => {
                        let status = format!(
                            "sb: {} of: {}",
                            if ctx.sb.is_writable() { "writable" } else { "read-only" },
                            if ctx.of.is_connected() { "connected" } else { "disconnected" },
                        );
                        unixctl::reply(&mut stream, &status).await;
                    }
                    UnixctlCommand::GroupTableList => {
                        unixctl::reply(&mut stream, &format!("{} groups", ctx.flow_output.lflow_table().len())).await;
                    }
                    UnixctlCommand::MeterTableList => {
                        unixctl::reply(&mut stream, "meters: see flow table entries").await;
                    }
                    UnixctlCommand::CtZoneList => {
                        unixctl::reply(&mut stream, &format!("{} ct-zones live", ctx.ct_zones.live_count())).await;
                    }
                    UnixctlCommand::InjectPkt(pkt) => {
                        info!(%pkt, "inject-pkt is a no-op without a wire OpenFlow channel");
                        unixctl::reply(&mut stream, "ok").await;
                    }
                    UnixctlCommand::Recompute => {
                        engine.request_recompute();
                        unixctl::reply(&mut stream, "recompute scheduled").await;
                    }
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("received interrupt, shutting down");
                return;
            }
        }
    }
}

async fn accept_unixctl(listener: Option<&tokio::net::UnixListener>) -> Option<(UnixctlCommand, tokio::net::UnixStream)> {
    match listener {
        Some(listener) => unixctl::accept_command(listener).await,
        None => std::future::pending().await,
    }
}
