use std::collections::VecDeque;

use tracing::{debug, warn};

use crate::types::Window;

/// Aviso no fatal: un canal lleva demasiados pushes sin recibir datos
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StaleChannel {
    pub index: usize,
    pub name: String,
    /// Pushes globales desde su última muestra (o desde el inicio)
    pub missed: u64,
}

struct ChannelQueue {
    name: String,
    values: VecDeque<f32>,
    last_push: Option<u64>,
}

/// Buffer de ventana deslizante multi-canal.
///
/// Cada canal tiene su propia cola acotada. Cuando el total de muestras de
/// todos los canales llega a `n_samples * num_channels` se construye una
/// ventana concatenando los canales en el orden declarado y se descarta la
/// muestra más antigua de cada canal, de modo que las ventanas se solapan y
/// avanzan de a un paso.
///
/// No se alinean los canales en el tiempo: si un dispositivo se desconecta y
/// vuelve, sus muestras viejas siguen en la cola y se reutilizan como si
/// fueran frescas.
pub struct WindowBuffer {
    channels: Vec<ChannelQueue>,
    n_samples: usize,
    capacity: usize,
    pushes: u64,
}

impl WindowBuffer {
    /// Crea el buffer con los canales en el orden en que se aplanarán
    pub fn new<S: Into<String>>(
        channel_names: impl IntoIterator<Item = S>,
        n_samples: usize,
        capacity: usize,
    ) -> Self {
        debug_assert!(
            capacity >= n_samples,
            "capacity ({}) < n_samples ({})",
            capacity,
            n_samples
        );
        let channels = channel_names
            .into_iter()
            .map(|name| ChannelQueue {
                name: name.into(),
                values: VecDeque::with_capacity(capacity + 1),
                last_push: None,
            })
            .collect();

        Self {
            channels,
            n_samples,
            capacity,
            pushes: 0,
        }
    }

    pub fn num_channels(&self) -> usize {
        self.channels.len()
    }

    pub fn n_samples(&self) -> usize {
        self.n_samples
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Muestras necesarias en total para una ventana
    pub fn threshold(&self) -> usize {
        self.n_samples * self.channels.len()
    }

    /// Total de muestras acumuladas en todos los canales
    pub fn total(&self) -> usize {
        self.channels.iter().map(|c| c.values.len()).sum()
    }

    pub fn is_ready(&self) -> bool {
        !self.channels.is_empty() && self.total() >= self.threshold()
    }

    pub fn channel_len(&self, index: usize) -> Option<usize> {
        self.channels.get(index).map(|c| c.values.len())
    }

    pub fn channel_index(&self, name: &str) -> Option<usize> {
        self.channels.iter().position(|c| c.name == name)
    }

    pub fn channel_names(&self) -> impl Iterator<Item = &str> {
        self.channels.iter().map(|c| c.name.as_str())
    }

    /// Añade una muestra al canal `index`.
    ///
    /// Devuelve la ventana si el total alcanzó el umbral. Índices fuera de
    /// rango se ignoran.
    pub fn push(&mut self, index: usize, value: f32) -> Option<Window> {
        if !self.append(index, value) {
            return None;
        }
        self.take_window()
    }

    /// Añade un valor a cada canal (orden declarado) en un solo paso.
    ///
    /// Si `values` es más corto que el número de canales, los canales
    /// restantes no reciben muestra en este paso.
    pub fn push_step(&mut self, values: &[f32]) -> Option<Window> {
        for (index, value) in values.iter().copied().enumerate().take(self.channels.len()) {
            self.append(index, value);
        }
        self.take_window()
    }

    fn append(&mut self, index: usize, value: f32) -> bool {
        let Some(channel) = self.channels.get_mut(index) else {
            warn!(index, "Canal inexistente, muestra descartada");
            return false;
        };

        self.pushes += 1;
        channel.last_push = Some(self.pushes);
        channel.values.push_back(value);

        // Cola acotada: sólo desaloja de este canal
        if channel.values.len() > self.capacity {
            channel.values.pop_front();
        }
        true
    }

    fn take_window(&mut self) -> Option<Window> {
        if !self.is_ready() {
            return None;
        }

        let window = self.get_window();

        for channel in self.channels.iter_mut() {
            channel.values.pop_front();
        }
        debug!(
            len = window.len(),
            remaining = self.total(),
            "Ventana lista"
        );
        Some(window)
    }

    /// Construye la ventana sin modificar las colas.
    ///
    /// Toma las `n_samples` muestras más recientes de cada canal; un canal
    /// con menos muestras se rellena con NaN al principio.
    pub fn get_window(&self) -> Window {
        let mut values = Vec::with_capacity(self.threshold());

        for channel in &self.channels {
            let len = channel.values.len();
            let missing = self.n_samples.saturating_sub(len);
            values.extend(std::iter::repeat(f32::NAN).take(missing));
            values.extend(channel.values.iter().skip(len.saturating_sub(self.n_samples)));
        }

        Window::new(values, self.n_samples, self.channels.len())
    }

    /// Canales que llevan más de `stale_after` pushes sin recibir muestra
    pub fn stale_channels(&self, stale_after: u64) -> Vec<StaleChannel> {
        self.channels
            .iter()
            .enumerate()
            .filter_map(|(index, channel)| {
                let missed = self.pushes - channel.last_push.unwrap_or(0);
                (missed > stale_after).then(|| StaleChannel {
                    index,
                    name: channel.name.clone(),
                    missed,
                })
            })
            .collect()
    }

    /// Vacía las colas de un canal (desconexión del dispositivo)
    pub fn clear_channel(&mut self, index: usize) {
        if let Some(channel) = self.channels.get_mut(index) {
            channel.values.clear();
        }
    }

    /// Limpia el buffer
    pub fn clear(&mut self) {
        for channel in self.channels.iter_mut() {
            channel.values.clear();
            channel.last_push = None;
        }
        self.pushes = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn xyz(n_samples: usize, capacity: usize) -> WindowBuffer {
        WindowBuffer::new(["x", "y", "z"], n_samples, capacity)
    }

    #[test]
    fn test_buffer_not_ready_initially() {
        let buffer = xyz(30, 30);
        assert!(!buffer.is_ready());
        assert_eq!(buffer.threshold(), 90);
        assert_eq!(buffer.total(), 0);
    }

    #[test]
    fn test_ninetieth_push_returns_window() {
        let mut buffer = xyz(30, 30);

        for i in 0..89 {
            assert!(buffer.push(i % 3, i as f32).is_none(), "push {}", i);
        }
        let window = buffer.push(89 % 3, 89.0).expect("ventana en el push 90");
        assert_eq!(window.len(), 90);

        // Orden declarado: x completo, luego y, luego z
        let x: Vec<f32> = (0..30).map(|t| (t * 3) as f32).collect();
        let y: Vec<f32> = (0..30).map(|t| (t * 3 + 1) as f32).collect();
        let z: Vec<f32> = (0..30).map(|t| (t * 3 + 2) as f32).collect();
        assert_eq!(window.channel(0).unwrap(), &x[..]);
        assert_eq!(window.channel(1).unwrap(), &y[..]);
        assert_eq!(window.channel(2).unwrap(), &z[..]);
    }

    #[test]
    fn test_eviction_after_window() {
        let mut buffer = xyz(30, 30);
        for i in 0..89 {
            buffer.push(i % 3, 0.0);
        }
        let before: Vec<usize> = (0..3).map(|c| buffer.channel_len(c).unwrap()).collect();
        assert_eq!(before, vec![30, 30, 29]);

        assert!(buffer.push(2, 0.0).is_some());
        let after: Vec<usize> = (0..3).map(|c| buffer.channel_len(c).unwrap()).collect();
        assert_eq!(after, vec![29, 29, 29]);
    }

    #[test]
    fn test_sliding_by_one_step() {
        let mut buffer = xyz(30, 30);
        let mut first = None;
        for t in 0..30 {
            first = buffer.push_step(&[t as f32, 100.0 + t as f32, 200.0 + t as f32]);
        }
        let first = first.expect("primera ventana");

        let second = buffer
            .push_step(&[30.0, 130.0, 230.0])
            .expect("ventana en cada paso siguiente");

        for c in 0..3 {
            let a = first.channel(c).unwrap();
            let b = second.channel(c).unwrap();
            assert_eq!(&a[1..], &b[..29]);
        }
        assert_eq!(second.channel(0).unwrap()[29], 30.0);
    }

    #[test]
    fn test_every_step_after_first_window_is_ready() {
        let mut buffer = xyz(30, 30);
        for t in 0..29 {
            assert!(buffer.push_step(&[t as f32; 3]).is_none());
        }
        for t in 29..200 {
            let window = buffer.push_step(&[t as f32; 3]).expect("ventana deslizante");
            assert_eq!(window.len(), 90);
            assert_eq!(window.channel(1).unwrap()[29], t as f32);
        }
    }

    #[test]
    fn test_single_pushes_after_first_window_complete_a_step() {
        let mut buffer = xyz(30, 30);
        for i in 0..89 {
            assert!(buffer.push(i % 3, i as f32).is_none());
        }
        let mut previous = buffer.push(2, 89.0).expect("ventana en el push 90");

        // Una ventana por paso completo: [None, None, Some] para tres canales
        let mut ready = Vec::new();
        for i in 90..120 {
            let window = buffer.push(i % 3, i as f32);
            ready.push(window.is_some());
            if let Some(window) = window {
                assert_eq!(window.len(), 90);
                for c in 0..3 {
                    assert_eq!(&previous.channel(c).unwrap()[1..], &window.channel(c).unwrap()[..29]);
                }
                assert_eq!(window.channel(2).unwrap()[29], i as f32);
                previous = window;
            }
        }
        let expected: Vec<bool> = (0..30).map(|k| k % 3 == 2).collect();
        assert_eq!(ready, expected);
    }

    #[test]
    fn test_capacity_is_the_configured_bound() {
        let mut buffer = xyz(3, 5);
        assert_eq!(buffer.capacity(), 5);
        for i in 0..8 {
            buffer.push(0, i as f32);
        }
        assert_eq!(buffer.channel_len(0), Some(5));
    }

    #[test]
    fn test_overflow_evicts_only_that_channel() {
        let mut buffer = xyz(30, 40);
        for i in 0..10 {
            buffer.push(1, i as f32);
        }
        for i in 0..45 {
            buffer.push(0, i as f32);
        }
        assert_eq!(buffer.channel_len(0), Some(40));
        assert_eq!(buffer.channel_len(1), Some(10));
        assert_eq!(buffer.channel_len(2), Some(0));
        assert!(!buffer.is_ready());
    }

    #[test]
    fn test_short_channel_is_padded_with_nan() {
        let mut buffer = WindowBuffer::new(["a", "b"], 3, 5);
        for i in 0..5 {
            buffer.push(0, i as f32);
        }
        let window = buffer.push(1, 9.0).expect("total 6 >= 6");
        let a = window.channel(0).unwrap();
        assert_eq!(a, &[2.0, 3.0, 4.0]);
        let b = window.channel(1).unwrap();
        assert!(b[0].is_nan() && b[1].is_nan());
        assert_eq!(b[2], 9.0);
    }

    #[test]
    fn test_nan_placeholder_keeps_position() {
        let mut buffer = WindowBuffer::new(["v"], 3, 3);
        buffer.push(0, 1.0);
        buffer.push(0, f32::NAN);
        let window = buffer.push(0, 3.0).unwrap();
        let values = window.as_slice();
        assert_eq!(values[0], 1.0);
        assert!(values[1].is_nan());
        assert_eq!(values[2], 3.0);
    }

    #[test]
    fn test_stale_channels() {
        let mut buffer = xyz(30, 30);
        for _ in 0..10 {
            buffer.push(0, 1.0);
            buffer.push(1, 1.0);
        }
        let stale = buffer.stale_channels(5);
        assert_eq!(stale.len(), 1);
        assert_eq!(stale[0].name, "z");
        assert_eq!(stale[0].missed, 20);
        assert!(buffer.stale_channels(20).is_empty());
    }

    #[test]
    fn test_unknown_channel_is_ignored() {
        let mut buffer = xyz(2, 2);
        assert!(buffer.push(7, 1.0).is_none());
        assert_eq!(buffer.total(), 0);
    }

    #[test]
    fn test_clear_channel_keeps_others() {
        let mut buffer = xyz(30, 30);
        for i in 0..6 {
            buffer.push(i % 3, 1.0);
        }
        buffer.clear_channel(1);
        assert_eq!(buffer.channel_len(0), Some(2));
        assert_eq!(buffer.channel_len(1), Some(0));
        assert_eq!(buffer.channel_len(2), Some(2));
    }
}
