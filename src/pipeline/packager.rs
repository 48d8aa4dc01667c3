//! Groups the sample stream into fixed-size bins.

pub struct Packager {
    window_size: usize,
    bin: Vec<f64>,
    bins: usize,
}

impl Packager {
    pub fn new(window_size: usize) -> Self {
        Self {
            window_size: window_size.max(1),
            bin: Vec::with_capacity(window_size),
            bins: 0,
        }
    }

    /// Bins emitted so far.
    pub fn bins(&self) -> usize {
        self.bins
    }

    /// Samples waiting in the partial bin.
    pub fn pending(&self) -> usize {
        self.bin.len()
    }

    /// Add samples, appending every completed bin to `out`.
    pub fn extend(&mut self, samples: &[f64], out: &mut Vec<Vec<f64>>) {
        let mut rest = samples;
        while !rest.is_empty() {
            let room = self.window_size - self.bin.len();
            let (head, tail) = rest.split_at(room.min(rest.len()));
            self.bin.extend_from_slice(head);
            rest = tail;
            if self.bin.len() == self.window_size {
                out.push(self.take_bin());
            }
        }
    }

    /// Zero-pad and return the partial bin, if any.
    pub fn finish(&mut self) -> Option<Vec<f64>> {
        if self.bin.is_empty() {
            return None;
        }
        self.bin.resize(self.window_size, 0.0);
        Some(self.take_bin())
    }

    fn take_bin(&mut self) -> Vec<f64> {
        self.bins += 1;
        std::mem::replace(&mut self.bin, Vec::with_capacity(self.window_size))
    }
}
