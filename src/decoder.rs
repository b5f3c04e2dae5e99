use thiserror::Error;
use tracing::trace;

use crate::layout::{FieldSpec, FrameLayout, Slot};
use crate::timestamp::SequenceClock;
use crate::types::{Channel, Sample};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error("Trama malformada ({layout}): esperados {expected} bytes, recibidos {actual}")]
    MalformedFrame {
        layout: &'static str,
        expected: usize,
        actual: usize,
    },
}

/// Resultado de decodificar una trama
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedFrame {
    pub sequence: Option<u32>,
    /// Tiempo reconstruido de la trama (ms)
    pub timestamp: i64,
    /// Muestras en orden temporal
    pub samples: Vec<Sample>,
}

/// Convierte un i16 big-endian a unidades físicas: `range * raw / resolution`
fn scaled(hi: u8, lo: u8, range: f32, resolution: f32) -> f32 {
    let raw = i16::from_be_bytes([hi, lo]);
    range * raw as f32 / resolution
}

fn magnetometer(hi: u8, lo: u8, sensitivity: u8) -> f32 {
    let raw = i16::from_be_bytes([hi, lo]) as f32;
    raw * ((sensitivity as f32 - 128.0) * 0.5 / 128.0 + 1.0)
}

/// Desempaqueta los tres valores LED de 18 bits que ocupan `b[o..o + 7]`
fn unpack_led(b: &[u8], o: usize) -> [u32; 3] {
    let byte = |i: usize| b[o + i] as u32;
    let led1 = byte(0) << 10 | byte(1) << 2 | (byte(2) & 0xC0) >> 6;
    let led2 = (byte(2) & 0x3F) << 12 | byte(3) << 4 | (byte(4) & 0xF0) >> 4;
    let led3 = (byte(4) & 0x0F) << 14 | byte(5) << 6 | (byte(6) & 0xFC) >> 2;
    [led1, led2, led3]
}

/// Comprueba la longitud fija del layout
pub fn check_frame(layout: &FrameLayout, frame: &[u8]) -> Result<(), DecodeError> {
    if frame.len() != layout.len {
        return Err(DecodeError::MalformedFrame {
            layout: layout.name,
            expected: layout.len,
            actual: frame.len(),
        });
    }
    Ok(())
}

/// Decodifica los campos de una trama con la marca de tiempo ya resuelta.
///
/// Función pura: los mismos bytes producen siempre las mismas muestras.
pub fn decode_fields(
    layout: &FrameLayout,
    frame: &[u8],
    timestamp: i64,
) -> Result<Vec<Sample>, DecodeError> {
    check_frame(layout, frame)?;

    let half_period = (500.0 / layout.frequency_hz).round() as i64;
    let mut earlier = Vec::new();
    let mut current = Vec::new();

    for field in layout.fields {
        let (ts, out) = match field.slot {
            Slot::Current => (timestamp, &mut current),
            Slot::HalfPeriodBefore => (timestamp - half_period, &mut earlier),
        };

        match field.spec {
            FieldSpec::Scaled {
                offset,
                channels,
                range,
                resolution,
            } => {
                for (axis, channel) in channels.into_iter().enumerate() {
                    let o = offset + axis * 2;
                    out.push(Sample::new(
                        ts,
                        channel,
                        scaled(frame[o], frame[o + 1], range, resolution),
                    ));
                }
            }
            FieldSpec::Magnetometer {
                offset,
                sensitivity_offset,
            } => {
                for (axis, channel) in Channel::MAG.into_iter().enumerate() {
                    let o = offset + axis * 2;
                    let value = magnetometer(frame[o], frame[o + 1], frame[sensitivity_offset + axis]);
                    out.push(Sample::new(ts, channel, value));
                }
            }
            FieldSpec::Led { offset } => {
                for (channel, value) in Channel::LED.into_iter().zip(unpack_led(frame, offset)) {
                    out.push(Sample::new(ts, channel, value as f32));
                }
            }
            FieldSpec::Raw => {
                for (idx, byte) in frame.iter().enumerate() {
                    out.push(Sample::new(ts, Channel::Raw(idx as u8), *byte as f32));
                }
            }
        }
    }

    if let Some(seq) = layout.sequence {
        current.push(Sample::new(timestamp, Channel::Sequence, seq.read(frame) as f32));
    }

    earlier.extend(current);
    Ok(earlier)
}

/// Decodificador con estado para un flujo físico (una característica de un dispositivo)
pub struct FrameDecoder {
    layout: &'static FrameLayout,
    clock: Option<SequenceClock>,
}

impl FrameDecoder {
    pub fn new(layout: &'static FrameLayout) -> Self {
        let clock = layout
            .sequence
            .map(|seq| SequenceClock::new(seq.modulus(), layout.frequency_hz));
        Self { layout, clock }
    }

    pub fn layout(&self) -> &'static FrameLayout {
        self.layout
    }

    /// Decodifica una trama y corrige su marca de tiempo.
    ///
    /// Una trama con longitud incorrecta se rechaza antes de tocar el reloj.
    pub fn decode(&mut self, frame: &[u8], host_now_ms: i64) -> Result<DecodedFrame, DecodeError> {
        check_frame(self.layout, frame)?;

        let sequence = self.layout.sequence.map(|seq| seq.read(frame));
        let timestamp = match (sequence, self.clock.as_mut()) {
            (Some(seq), Some(clock)) => clock.correct(seq, host_now_ms),
            _ => host_now_ms,
        };

        let samples = decode_fields(self.layout, frame, timestamp)?;
        trace!(
            layout = self.layout.name,
            ?sequence,
            timestamp,
            samples = samples.len(),
            "Trama decodificada"
        );

        Ok(DecodedFrame {
            sequence,
            timestamp,
            samples,
        })
    }

    /// Reinicia el reloj de secuencia (nueva conexión)
    pub fn reset(&mut self) {
        if let Some(clock) = self.clock.as_mut() {
            clock.reset();
        }
    }
}
