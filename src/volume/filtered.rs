//! Value-range view of a [`Volume`].

use std::borrow::Cow;

use super::stats::{FieldStats, GridStats};
use super::Volume;

/// Cells of a [`Volume`] whose value lies inside (or outside) a range,
/// compacted into parallel value, position and atom id arrays.
///
/// Sigma arithmetic uses the statistics of the whole volume, not of the
/// selected cells.
#[derive(Debug)]
pub struct FilteredVolume<'a> {
    volume: &'a Volume,
    filter: Option<(f32, f32, bool)>,
    data: Cow<'a, [f32]>,
    position: Cow<'a, [f32]>,
    atom_index: Option<Cow<'a, [i32]>>,
}

impl<'a> FilteredVolume<'a> {
    /// View of `volume` filtered by [`Self::set_filter`].
    #[must_use]
    pub fn new(
        volume: &'a Volume,
        min_value: Option<f32>,
        max_value: Option<f32>,
        outside: bool,
    ) -> Self {
        let mut filtered = Self {
            volume,
            filter: None,
            data: Cow::Borrowed(&[]),
            position: Cow::Borrowed(&[]),
            atom_index: None,
        };
        let _ = filtered.set_filter(min_value, max_value, outside);
        filtered
    }

    /// Keep cells with `min_value <= v <= max_value`, or those outside that
    /// range when `outside` is set. Missing bounds are unbounded; a NaN
    /// minimum means the 2-sigma contour. Returns whether the selection
    /// was recomputed.
    pub fn set_filter(
        &mut self,
        min_value: Option<f32>,
        max_value: Option<f32>,
        outside: bool,
    ) -> bool {
        let min = match min_value {
            Some(v) if v.is_nan() => self.volume.value_for_sigma(2.0),
            Some(v) => v,
            None => f32::NEG_INFINITY,
        };
        let max = max_value.unwrap_or(f32::INFINITY);
        let filter = (min, max, outside);
        if self.filter == Some(filter) {
            return false;
        }
        self.filter = Some(filter);

        let volume = self.volume;
        let source = volume.field().data();
        let atom_index = volume.field().atom_index();
        if min == f32::NEG_INFINITY && max == f32::INFINITY {
            self.data = Cow::Borrowed(source);
            self.position = Cow::Borrowed(volume.position());
            self.atom_index = atom_index.map(Cow::Borrowed);
            return true;
        }

        let keep = |v: f32| {
            if outside {
                v < min || v > max
            } else {
                v >= min && v <= max
            }
        };
        let position = volume.position();
        let mut data = Vec::new();
        let mut kept_position = Vec::new();
        let mut kept_atoms = atom_index.map(|_| Vec::new());
        for (i, &v) in source.iter().enumerate() {
            if !keep(v) {
                continue;
            }
            data.push(v);
            kept_position.extend_from_slice(&position[i * 3..i * 3 + 3]);
            if let (Some(kept), Some(ids)) = (&mut kept_atoms, atom_index) {
                kept.push(ids[i]);
            }
        }
        self.data = Cow::Owned(data);
        self.position = Cow::Owned(kept_position);
        self.atom_index = kept_atoms.map(Cow::Owned);
        true
    }

    /// Underlying volume.
    #[must_use]
    pub fn volume(&self) -> &'a Volume {
        self.volume
    }

    /// Selected values.
    #[must_use]
    pub fn data(&self) -> &[f32] {
        &self.data
    }

    /// World positions of the selected cells, xyz-interleaved.
    #[must_use]
    pub fn position(&self) -> &[f32] {
        &self.position
    }

    /// Atom ids of the selected cells, when the field carries them.
    #[must_use]
    pub fn atom_index(&self) -> Option<&[i32]> {
        self.atom_index.as_deref()
    }

    /// Number of selected cells.
    #[must_use]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Whether no cell was selected.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

impl GridStats for FilteredVolume<'_> {
    fn stats(&self) -> FieldStats {
        self.volume.stats()
    }
}
