use std::path::Path;

use anyhow::{bail, Context, Result};
use csv::ReaderBuilder;
use tracing::warn;

use crate::types::Window;
use crate::window_buffer::WindowBuffer;

/// Una fila grabada: `timestamp,channel,value`
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedSample {
    pub timestamp: i64,
    pub channel: String,
    pub value: f32,
}

/// Carga una grabación en el formato timestamp,channel,value.
///
/// Un valor que no se puede interpretar queda como NaN para no romper la
/// posición de la muestra en su canal.
pub fn load_samples_from_csv(path: impl AsRef<Path>) -> Result<Vec<RecordedSample>> {
    let path = path.as_ref();
    let reader = ReaderBuilder::new()
        .has_headers(true)
        .from_path(path)
        .with_context(|| format!("No se pudo abrir el CSV {:?}", path))?;

    read_samples(reader, &path.display().to_string())
}

fn read_samples<R: std::io::Read>(
    mut reader: csv::Reader<R>,
    source: &str,
) -> Result<Vec<RecordedSample>> {
    let mut samples = Vec::new();

    for (row_idx, result) in reader.records().enumerate() {
        let record =
            result.with_context(|| format!("Fila {} inválida en {}", row_idx + 1, source))?;
        if record.len() < 3 {
            bail!("La fila {} no tiene 3 columnas", row_idx + 1);
        }

        let timestamp: i64 = record[0]
            .trim()
            .parse()
            .with_context(|| format!("timestamp inválido en fila {}", row_idx + 1))?;
        let channel = record[1].trim().to_string();
        let value = match record[2].trim().parse::<f32>() {
            Ok(v) => v,
            Err(_) => {
                warn!(row = row_idx + 1, raw = &record[2], "Valor ilegible, se usa NaN");
                f32::NAN
            }
        };

        samples.push(RecordedSample {
            timestamp,
            channel,
            value,
        });
    }

    Ok(samples)
}

/// Reproduce la grabación sobre el buffer y devuelve las ventanas producidas
pub fn replay_into(buffer: &mut WindowBuffer, samples: &[RecordedSample]) -> Vec<(i64, Window)> {
    let mut windows = Vec::new();
    for sample in samples {
        let Some(index) = buffer.channel_index(&sample.channel) else {
            warn!(channel = %sample.channel, "Canal no declarado, muestra ignorada");
            continue;
        };
        if let Some(window) = buffer.push(index, sample.value) {
            windows.push((sample.timestamp, window));
        }
    }
    windows
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn test_unparsable_value_becomes_nan() {
        let data = "timestamp,channel,value\n0,x,1.5\n40,x,oops\n80,x,2\n";
        let reader = ReaderBuilder::new().from_reader(data.as_bytes());
        let samples = read_samples(reader, "memoria").unwrap();
        assert_eq!(samples.len(), 3);
        assert_eq!(samples[0].value, 1.5);
        assert!(samples[1].value.is_nan());
        assert_eq!(samples[2].timestamp, 80);
    }

    #[test]
    fn test_bad_timestamp_is_an_error() {
        let data = "timestamp,channel,value\nabc,x,1.0\n";
        let reader = ReaderBuilder::new().from_reader(data.as_bytes());
        assert!(read_samples(reader, "memoria").is_err());
    }

    #[test]
    fn test_replay_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rec.csv");
        let mut content = String::from("timestamp,channel,value\n");
        for t in 0..4 {
            content.push_str(&format!("{},x,{}\n{},y,{}\n{},w,9\n", t * 40, t, t * 40, t + 10, t * 40));
        }
        fs::write(&path, content).unwrap();

        let samples = load_samples_from_csv(&path).unwrap();
        let mut buffer = WindowBuffer::new(["x", "y"], 3, 3);
        let windows = replay_into(&mut buffer, &samples);

        assert_eq!(windows.len(), 2);
        assert_eq!(windows[0].0, 80);
        assert_eq!(windows[0].1.as_slice(), &[0.0, 1.0, 2.0, 10.0, 11.0, 12.0]);
        assert_eq!(windows[1].1.as_slice(), &[1.0, 2.0, 3.0, 11.0, 12.0, 13.0]);
    }
}
