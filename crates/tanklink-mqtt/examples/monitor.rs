//! Watch one water heater and print status changes.
//!
//! ```sh
//! TANKLINK_HOST=mqtt.example.com TANKLINK_USER=... TANKLINK_PASS=... \
//!     cargo run --example monitor -- 04:78:63:aa:bb:cc
//! ```

use std::sync::Arc;

use tanklink_core::{Event, EventKind, Session, SessionConfig, Transport};
use tanklink_mqtt::{MqttConfig, MqttTransport};
use tanklink_proto::Device;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,tanklink_core=debug".into()),
        )
        .init();

    let mac = std::env::args()
        .nth(1)
        .ok_or("usage: monitor <device-mac>")?;
    let host = std::env::var("TANKLINK_HOST")?;
    let device = Device::new(mac.as_str());

    let session_config = SessionConfig::default();
    let mut mqtt_config = MqttConfig::new(host, session_config.client_id.clone());
    if let (Ok(user), Ok(pass)) = (
        std::env::var("TANKLINK_USER"),
        std::env::var("TANKLINK_PASS"),
    ) {
        mqtt_config = mqtt_config.credentials(user, pass);
    }

    let transport: Arc<dyn Transport> = Arc::new(MqttTransport::new(mqtt_config));
    let session = Session::spawn(session_config, transport);

    session
        .on(EventKind::FieldChanged, |event| {
            if let Event::FieldChanged {
                device,
                field,
                previous,
                current,
                ..
            } = event
            {
                println!("{device}: {field} {previous:?} -> {current:?}");
            }
            Ok(())
        })
        .await?;
    session
        .on(EventKind::ErrorRaised, |event| {
            if let Event::ErrorRaised { device, code, .. } = event {
                eprintln!("{device}: error {code} raised");
            }
            Ok(())
        })
        .await?;

    session.watch(&device).await?;
    session.connect().await?;

    let status = session.request_status(&device).await?;
    println!(
        "tank at {:?}, setpoint {:?}, charge {:?}%",
        status.number("dhw_temperature"),
        status.number("dhw_temperature_setting"),
        status.number("dhw_charge_percent"),
    );

    tokio::signal::ctrl_c().await?;
    session.disconnect().await?;
    Ok(())
}
