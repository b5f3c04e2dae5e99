//! Descriptores declarativos de las tramas MotionSense.
//!
//! Cada característica BLE se describe con un [`FrameLayout`]: longitud fija,
//! frecuencia nominal, campos con su offset y escala, y el contador de
//! secuencia. El decodificador es único y sólo interpreta estos descriptores.

use serde::Deserialize;

use crate::types::{Channel, FRAME_LEN};

/// Momento al que corresponde un campo dentro de la trama
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Slot {
    /// Tiempo reconstruido de la trama
    Current,
    /// Medio periodo de muestreo antes (`500 / frecuencia` ms)
    HalfPeriodBefore,
}

/// Tipo de campo y dónde vive dentro de la trama
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FieldSpec {
    /// Tres i16 big-endian convertidos con `range * raw / resolution`
    Scaled {
        offset: usize,
        channels: [Channel; 3],
        range: f32,
        resolution: f32,
    },
    /// Tres i16 big-endian corregidos con un byte de sensibilidad por eje
    Magnetometer {
        offset: usize,
        sensitivity_offset: usize,
    },
    /// Tres valores de 18 bits empaquetados en 7 bytes (cortes a 10/12/14 bits)
    Led { offset: usize },
    /// Todos los bytes de la trama como valores sin signo
    Raw,
}

impl FieldSpec {
    /// Último byte (exclusivo) que lee el campo
    pub fn end(&self, frame_len: usize) -> usize {
        match *self {
            FieldSpec::Scaled { offset, .. } => offset + 6,
            FieldSpec::Magnetometer {
                offset,
                sensitivity_offset,
            } => (offset + 6).max(sensitivity_offset + 3),
            FieldSpec::Led { offset } => offset + 7,
            FieldSpec::Raw => frame_len,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Field {
    pub spec: FieldSpec,
    pub slot: Slot,
}

/// Contador de secuencia `(b[n] & mask) << 8 | b[n+1]`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SequenceField {
    pub offset: usize,
    pub mask: u8,
}

impl SequenceField {
    /// Número de valores distintos del contador (M)
    pub fn modulus(&self) -> u32 {
        (self.mask as u32 + 1) << 8
    }

    pub fn read(&self, frame: &[u8]) -> u32 {
        ((frame[self.offset] & self.mask) as u32) << 8 | frame[self.offset + 1] as u32
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrameLayout {
    pub name: &'static str,
    pub len: usize,
    pub frequency_hz: f64,
    pub fields: &'static [Field],
    pub sequence: Option<SequenceField>,
}

const ACCEL_RANGE: f32 = 2.0;
const ACCEL_RESOLUTION: f32 = 16384.0;
const GYRO_RANGE: f32 = 500.0;
const GYRO_RESOLUTION: f32 = 32768.0;

const fn accel(offset: usize) -> FieldSpec {
    FieldSpec::Scaled {
        offset,
        channels: Channel::ACCEL,
        range: ACCEL_RANGE,
        resolution: ACCEL_RESOLUTION,
    }
}

const fn gyro(offset: usize) -> FieldSpec {
    FieldSpec::Scaled {
        offset,
        channels: Channel::GYRO,
        range: GYRO_RANGE,
        resolution: GYRO_RESOLUTION,
    }
}

/// Acelerómetro + dos lecturas de giroscopio (antes/después del acelerómetro)
pub const ACCEL_GYRO: FrameLayout = FrameLayout {
    name: "accel_gyro",
    len: FRAME_LEN,
    frequency_hz: 25.0,
    fields: &[
        Field {
            spec: accel(0),
            slot: Slot::Current,
        },
        Field {
            spec: gyro(6),
            slot: Slot::HalfPeriodBefore,
        },
        Field {
            spec: gyro(12),
            slot: Slot::Current,
        },
    ],
    sequence: Some(SequenceField {
        offset: 18,
        mask: 0xFF,
    }),
};

/// Acelerómetro + giroscopio + tres LEDs de PPG, contador de 10 bits
pub const ACCEL_GYRO_LED: FrameLayout = FrameLayout {
    name: "accel_gyro_led",
    len: FRAME_LEN,
    frequency_hz: 25.0,
    fields: &[
        Field {
            spec: accel(0),
            slot: Slot::Current,
        },
        Field {
            spec: gyro(6),
            slot: Slot::Current,
        },
        Field {
            spec: FieldSpec::Led { offset: 12 },
            slot: Slot::Current,
        },
    ],
    sequence: Some(SequenceField {
        offset: 18,
        mask: 0x03,
    }),
};

/// Dos lecturas de magnetómetro con sensibilidad por eje, contador de 11 bits
pub const MAGNETOMETER: FrameLayout = FrameLayout {
    name: "magnetometer",
    len: FRAME_LEN,
    frequency_hz: 25.0,
    fields: &[
        Field {
            spec: FieldSpec::Magnetometer {
                offset: 0,
                sensitivity_offset: 12,
            },
            slot: Slot::HalfPeriodBefore,
        },
        Field {
            spec: FieldSpec::Magnetometer {
                offset: 6,
                sensitivity_offset: 12,
            },
            slot: Slot::Current,
        },
    ],
    sequence: Some(SequenceField {
        offset: 18,
        mask: 0x07,
    }),
};

/// Canal de diagnóstico: la trama completa sin interpretar
pub const RAW: FrameLayout = FrameLayout {
    name: "raw",
    len: FRAME_LEN,
    frequency_hz: 25.0,
    fields: &[Field {
        spec: FieldSpec::Raw,
        slot: Slot::Current,
    }],
    sequence: None,
};

/// Identificador de layout usado en la configuración
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LayoutKind {
    AccelGyro,
    AccelGyroLed,
    Magnetometer,
    Raw,
}

impl LayoutKind {
    pub fn layout(self) -> &'static FrameLayout {
        match self {
            LayoutKind::AccelGyro => &ACCEL_GYRO,
            LayoutKind::AccelGyroLed => &ACCEL_GYRO_LED,
            LayoutKind::Magnetometer => &MAGNETOMETER,
            LayoutKind::Raw => &RAW,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sequence_modulus_by_mask() {
        assert_eq!(ACCEL_GYRO.sequence.unwrap().modulus(), 65536);
        assert_eq!(ACCEL_GYRO_LED.sequence.unwrap().modulus(), 1024);
        assert_eq!(MAGNETOMETER.sequence.unwrap().modulus(), 2048);
    }

    #[test]
    fn test_fields_stay_inside_frame() {
        for kind in [
            LayoutKind::AccelGyro,
            LayoutKind::AccelGyroLed,
            LayoutKind::Magnetometer,
            LayoutKind::Raw,
        ] {
            let layout = kind.layout();
            for field in layout.fields {
                assert!(field.spec.end(layout.len) <= layout.len, "{}", layout.name);
            }
            if let Some(seq) = layout.sequence {
                assert!(seq.offset + 2 <= layout.len);
            }
        }
    }

    #[test]
    fn test_sequence_read_applies_mask() {
        let mut frame = [0u8; FRAME_LEN];
        frame[18] = 0xFE;
        frame[19] = 0x10;
        assert_eq!(ACCEL_GYRO.sequence.unwrap().read(&frame), 0xFE10);
        assert_eq!(ACCEL_GYRO_LED.sequence.unwrap().read(&frame), 0x210);
        assert_eq!(MAGNETOMETER.sequence.unwrap().read(&frame), 0x610);
    }
}
