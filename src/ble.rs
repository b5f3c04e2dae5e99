//! Fuente de tramas sobre BlueZ (D-Bus del sistema).
//!
//! Sólo conecta, activa notificaciones de la característica y reenvía cada
//! `Value` como trama cruda a la cola con pérdida del dispositivo. La
//! decodificación ocurre en el carril del pipeline.

use dbus::arg::{RefArg, Variant};
use dbus::blocking::Connection;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use crate::frame_queue::{FrameSender, Push};

/// Ruta D-Bus del dispositivo a partir de su MAC
pub fn device_path(adapter: &str, mac: &str) -> String {
    format!("/org/bluez/{}/dev_{}", adapter, mac.replace(':', "_"))
}

/// Extrae los bytes de una propiedad `Value`
fn value_bytes(value: &dyn RefArg) -> Option<Vec<u8>> {
    value
        .as_iter()
        .map(|iter| iter.filter_map(|item| item.as_u64().map(|b| b as u8)).collect())
}

/// Conecta al dispositivo y empuja cada notificación a `frames` hasta que
/// `running` pase a `false`, el carril del dispositivo se cierre o falle la
/// conexión
pub fn start_ble_receiver(
    target_mac: &str,
    characteristic: &str,
    frames: FrameSender,
    running: Arc<AtomicBool>,
) -> Result<(), Box<dyn std::error::Error>> {
    let conn = Connection::new_system()?;

    let adapter_proxy = conn.with_proxy("org.bluez", "/org/bluez/hci0", Duration::from_secs(5));
    let _: () = adapter_proxy.method_call(
        "org.freedesktop.DBus.Properties",
        "Set",
        ("org.bluez.Adapter1", "Powered", Variant(true)),
    )?;
    info!("Adaptador Bluetooth encendido");

    let device_path_str = device_path("hci0", target_mac);
    let device_proxy = conn.with_proxy("org.bluez", &device_path_str, Duration::from_secs(10));

    if let Err(e) = device_proxy.method_call::<(), _, _, _>("org.bluez.Device1", "Connect", ()) {
        warn!(device = target_mac, error = %e, "Conexión fallida, reintentando en 3 s");
        std::thread::sleep(Duration::from_secs(3));
        device_proxy.method_call::<(), _, _, _>("org.bluez.Device1", "Connect", ())?;
    }
    info!(device = target_mac, "Dispositivo conectado");

    let char_path = format!("{}/{}", device_path_str, characteristic);
    let char_proxy = conn.with_proxy("org.bluez", &char_path, Duration::from_secs(5));
    char_proxy.method_call::<(), _, _, _>("org.bluez.GattCharacteristic1", "StartNotify", ())?;
    info!(characteristic = %char_path, "Notificaciones BLE iniciadas");

    use dbus::blocking::stdintf::org_freedesktop_dbus::PropertiesPropertiesChanged as PC;
    use dbus::message::SignalArgs;

    let char_path_clone = char_path.clone();
    let lane = frames.clone();
    let mr = PC::match_rule(None, None);
    conn.add_match(mr, move |pc: PC, _, msg| {
        if msg.path().map(|p| p.to_string()) != Some(char_path_clone.clone()) {
            return true;
        }

        if let Some(value) = pc
            .changed_properties
            .get("Value")
            .and_then(|v| value_bytes(&*v.0))
        {
            if frames.push(value) == Push::Closed {
                return false;
            }
        }
        true
    })?;

    while running.load(Ordering::Relaxed) && !lane.is_closed() {
        conn.process(Duration::from_secs(1))?;
    }

    let _ = char_proxy.method_call::<(), _, _, _>("org.bluez.GattCharacteristic1", "StopNotify", ());
    info!(device = target_mac, closed = lane.is_closed(), "Receptor BLE detenido");
    Ok(())
}
