use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{debug, warn};

/// Reloj del host en ms desde la época Unix
pub fn host_now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

/// Diferencia hacia delante entre dos valores de un contador que da la vuelta en `modulus`
pub fn wrap_delta(last: u32, current: u32, modulus: u32) -> u32 {
    let last = last % modulus;
    let current = current % modulus;
    (current + modulus - last) % modulus
}

#[derive(Debug, Clone, Copy)]
struct ClockState {
    last_sequence: u32,
    last_timestamp: f64,
    last_host_ms: i64,
}

/// Reconstruye marcas de tiempo a partir del contador de secuencia del dispositivo.
///
/// Sólo la primera muestra usa el reloj del host; las siguientes avanzan
/// `delta * 1000 / frecuencia` ms desde la anterior, así el jitter del host
/// no entra en la serie.
///
/// Limitación conocida: si pasa más de un periodo completo del contador sin
/// datos, el delta se pliega y la marca resultante queda corta. Se avisa por
/// log pero no se corrige.
#[derive(Debug, Clone)]
pub struct SequenceClock {
    modulus: u32,
    frequency_hz: f64,
    state: Option<ClockState>,
}

impl SequenceClock {
    pub fn new(modulus: u32, frequency_hz: f64) -> Self {
        debug_assert!(modulus > 0 && frequency_hz > 0.0);
        Self {
            modulus,
            frequency_hz,
            state: None,
        }
    }

    pub fn modulus(&self) -> u32 {
        self.modulus
    }

    /// Duración de una vuelta completa del contador (ms)
    pub fn period_ms(&self) -> f64 {
        self.modulus as f64 * 1000.0 / self.frequency_hz
    }

    /// Marca de tiempo (ms) para la muestra con número de secuencia `sequence`
    pub fn correct(&mut self, sequence: u32, host_now_ms: i64) -> i64 {
        let sequence = sequence % self.modulus;

        let Some(state) = self.state else {
            self.state = Some(ClockState {
                last_sequence: sequence,
                last_timestamp: host_now_ms as f64,
                last_host_ms: host_now_ms,
            });
            return host_now_ms;
        };

        let host_elapsed = host_now_ms - state.last_host_ms;
        if host_elapsed as f64 > self.period_ms() {
            warn!(
                host_elapsed_ms = host_elapsed,
                period_ms = self.period_ms(),
                "Hueco mayor que una vuelta del contador, la marca de tiempo puede estar plegada"
            );
        }

        let delta = wrap_delta(state.last_sequence, sequence, self.modulus);
        let timestamp = state.last_timestamp + delta as f64 * 1000.0 / self.frequency_hz;
        debug!(sequence, delta, timestamp, "Marca de tiempo corregida");

        self.state = Some(ClockState {
            last_sequence: sequence,
            last_timestamp: timestamp,
            last_host_ms: host_now_ms,
        });
        timestamp.round() as i64
    }

    /// Olvida el estado (reconexión del dispositivo)
    pub fn reset(&mut self) {
        self.state = None;
    }

    pub fn last_sequence(&self) -> Option<u32> {
        self.state.map(|s| s.last_sequence)
    }
}
