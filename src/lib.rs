pub mod catalog;
pub mod commands;
pub mod config;
pub mod device;
pub mod serial;
pub mod server;

use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use config::{Cli, Mode};
use device::DeviceManager;
use serial::SerialInterface;
use server::Router;

pub fn run() -> anyhow::Result<()> {
  let cli = Cli::parse();

  env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(&cli.log_level))
    .init();

  let runtime = tokio::runtime::Builder::new_multi_thread()
    .enable_all()
    .build()
    .context("failed to start runtime")?;

  runtime.block_on(async move {
    match cli.mode() {
      Mode::Serve => serve(&cli).await,
      Mode::Operations => print_operations(&cli),
      Mode::Invoke { id } => invoke(&cli, &id).await,
      Mode::Ports => print_ports(),
    }
  })
}

async fn serve(cli: &Cli) -> anyhow::Result<()> {
  let manager = Arc::new(DeviceManager::new(cli.descriptor()?));
  manager
    .connect(&cli.path)
    .await
    .with_context(|| format!("cannot open {}", cli.path))?;

  let mut router = Router::new();
  manager.register_with(&mut router).await?;

  let addr = cli.listen_addr()?;
  let listener = tokio::net::TcpListener::bind(addr)
    .await
    .with_context(|| format!("cannot listen on {}", addr))?;

  let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
  let grace = cli.grace();
  let mut server = tokio::spawn(server::serve(listener, Arc::new(router), shutdown_rx, grace));

  let finished = tokio::select! {
    signal = shutdown_signal() => {
      if let Err(e) = signal {
        log::error!("Cannot wait for shutdown signal: {}", e);
      }
      log::info!("Shutting down, allowing {:?} for in-flight requests", grace);
      shutdown_tx.send_replace(true);
      server.await
    }
    finished = &mut server => {
      log::warn!("Operation server stopped on its own; shutting down");
      finished
    }
  };

  match finished {
    Ok(Ok(())) => {}
    Ok(Err(e)) => log::error!("Operation server failed: {}", e),
    Err(e) => log::error!("Operation server task failed: {}", e),
  }

  manager.shutdown(grace).await?;
  log::info!("Shutdown complete");
  Ok(())
}

/// Resolves on Ctrl-C, or on SIGTERM where the platform has it.
async fn shutdown_signal() -> std::io::Result<()> {
  #[cfg(unix)]
  {
    use tokio::signal::unix::{signal, SignalKind};

    let mut terminate = signal(SignalKind::terminate())?;
    tokio::select! {
      result = tokio::signal::ctrl_c() => result,
      _ = terminate.recv() => {
        log::info!("Received SIGTERM");
        Ok(())
      }
    }
  }

  #[cfg(not(unix))]
  {
    tokio::signal::ctrl_c().await
  }
}

fn print_operations(cli: &Cli) -> anyhow::Result<()> {
  let descriptor = cli.descriptor()?;
  let commands: Vec<_> = descriptor.commands().iter().map(|c| c.as_ref()).collect();
  println!("{}", serde_json::to_string_pretty(&commands)?);
  Ok(())
}

async fn invoke(cli: &Cli, id: &str) -> anyhow::Result<()> {
  let manager = DeviceManager::new(cli.descriptor()?);
  manager
    .connect(&cli.path)
    .await
    .with_context(|| format!("cannot open {}", cli.path))?;

  let result = manager.invoke(id).await;
  manager.disconnect().await?;

  println!("{}", serde_json::to_string_pretty(&result?)?);
  Ok(())
}

fn print_ports() -> anyhow::Result<()> {
  let ports = SerialInterface::discover_ports()?;
  println!("{}", serde_json::to_string_pretty(&ports)?);
  Ok(())
}
