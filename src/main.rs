use miband_heart_rate::domain::models::HrEvent;
use miband_heart_rate::domain::settings::SettingsService;
use miband_heart_rate::infrastructure::bluetooth::{
    controller_channel, BtleplugTransport, ReconnectionController,
};
use miband_heart_rate::infrastructure::logging;
use miband_heart_rate::presentation::console::{parse_command, ConsoleSink};
use std::io::BufRead;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

fn main() -> anyhow::Result<()> {
    let settings_service = SettingsService::new()?;
    let settings = settings_service.get();

    let _logging_guard = logging::init_logger(&settings.log_settings)
        .map_err(|e| eprintln!("Failed to initialize logging: {}", e))
        .ok();

    info!("Starting heart rate monitor");
    info!("Settings loaded from {}", settings_service.path().display());

    let (event_tx, mut event_rx) = mpsc::unbounded_channel();
    let (handle, ports) = controller_channel();
    let config = settings.controller_config();
    let connect_timeout = settings.connect_timeout();
    let signal_handle = handle.clone();

    let worker = std::thread::Builder::new()
        .name("bluetooth".to_string())
        .spawn(move || {
            let rt = match tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
            {
                Ok(rt) => rt,
                Err(e) => {
                    error!("Failed to create tokio runtime for Bluetooth: {}", e);
                    let _ = event_tx.send(HrEvent::ErrorRaised {
                        message: format!("Bluetooth worker failed to start: {e}"),
                        attempts_remaining: None,
                    });
                    return;
                }
            };

            rt.block_on(async move {
                let transport = match BtleplugTransport::new(connect_timeout).await {
                    Ok(transport) => transport,
                    Err(e) => {
                        error!("Bluetooth unavailable: {}", e);
                        let _ = event_tx.send(HrEvent::ErrorRaised {
                            message: format!("Bluetooth unavailable: {e}"),
                            attempts_remaining: None,
                        });
                        let _ = event_tx.send(HrEvent::Disconnected);
                        return;
                    }
                };

                tokio::spawn(async move {
                    if tokio::signal::ctrl_c().await.is_ok() {
                        info!("Ctrl-C received, stopping");
                        signal_handle.stop();
                    }
                });

                ReconnectionController::new(transport, event_tx, ports, config)
                    .run()
                    .await;
            });
        })?;

    let input_handle = handle.clone();
    std::thread::Builder::new()
        .name("stdin".to_string())
        .spawn(move || {
            for line in std::io::stdin().lock().lines() {
                let Ok(line) = line else { break };
                match parse_command(&line) {
                    Some(command) => input_handle.send(command),
                    None if line.trim().is_empty() => {}
                    None => warn!("Unknown command {:?}, use r, s or q", line.trim()),
                }
            }
        })?;

    println!("Commands: r = reconnect, s = rescan, q = quit");
    let mut sink = ConsoleSink::new();
    while let Some(event) = event_rx.blocking_recv() {
        println!("{}", sink.handle(&event));
    }

    if worker.join().is_err() {
        error!("Bluetooth worker panicked");
    }
    if let Some(sample) = sink.latest_sample() {
        info!("Last heart rate: {} bpm", sample.value);
    }
    info!("Heart rate monitor stopped, last state: {}", handle.state());
    Ok(())
}
