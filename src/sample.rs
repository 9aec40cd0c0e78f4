/// One point of a voltammogram.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Sample {
    pub potential_millivolts: f64,
    pub current_microamps: f64,
}

impl Sample {
    pub fn new(potential_millivolts: f64, current_microamps: f64) -> Self {
        Self {
            potential_millivolts,
            current_microamps,
        }
    }

    /// The sample as an `(x, y)` chart coordinate.
    pub fn as_point(&self) -> (f64, f64) {
        (self.potential_millivolts, self.current_microamps)
    }
}

/// Samples of one sweep in arrival order.
///
/// The series only grows while the sweep runs; nothing is ever removed or
/// reordered.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SampleSeries {
    samples: Vec<Sample>,
}

impl SampleSeries {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, sample: Sample) {
        self.samples.push(sample);
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Sample> {
        self.samples.iter()
    }

    pub fn as_slice(&self) -> &[Sample] {
        &self.samples
    }

    /// Smallest and largest potential seen, if any.
    pub fn potential_range(&self) -> Option<(f64, f64)> {
        range(self.samples.iter().map(|s| s.potential_millivolts))
    }

    /// Smallest and largest current seen, if any.
    pub fn current_range(&self) -> Option<(f64, f64)> {
        range(self.samples.iter().map(|s| s.current_microamps))
    }
}

impl FromIterator<Sample> for SampleSeries {
    fn from_iter<I: IntoIterator<Item = Sample>>(iter: I) -> Self {
        Self {
            samples: iter.into_iter().collect(),
        }
    }
}

impl<'a> IntoIterator for &'a SampleSeries {
    type Item = &'a Sample;
    type IntoIter = std::slice::Iter<'a, Sample>;

    fn into_iter(self) -> Self::IntoIter {
        self.samples.iter()
    }
}

fn range(values: impl Iterator<Item = f64>) -> Option<(f64, f64)> {
    values
        .filter(|v| v.is_finite())
        .fold(None, |acc, v| match acc {
            None => Some((v, v)),
            Some((lo, hi)) => Some((lo.min(v), hi.max(v))),
        })
}
