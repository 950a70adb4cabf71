use super::*;

/// The stock lengths available for a plan, in unlimited supply.
///
/// Lengths are kept sorted ascending and de-duplicated within `EPSILON`.
#[cfg_attr(feature = "serialize", derive(Serialize))]
#[cfg_attr(feature = "serialize", serde(transparent))]
#[derive(Clone, Debug, PartialEq)]
pub struct StockCatalog {
    lengths: Vec<f64>,
}

impl StockCatalog {
    /// Validates and normalizes stock lengths.
    pub fn new<I>(lengths: I) -> Result<Self>
    where
        I: IntoIterator<Item = f64>,
    {
        let mut lengths: Vec<f64> = lengths.into_iter().collect();
        if let Some(&value) = lengths.iter().find(|l| !l.is_finite() || **l <= 0.0) {
            return Err(Error::InvalidLength {
                kind: LengthKind::Stock,
                value,
            });
        }

        lengths.sort_by(f64::total_cmp);
        lengths.dedup_by(|a, b| (*a - *b).abs() <= EPSILON);

        if lengths.is_empty() {
            return Err(Error::EmptyStock);
        }

        Ok(StockCatalog { lengths })
    }

    /// Lengths in ascending order.
    pub fn lengths(&self) -> &[f64] {
        &self.lengths
    }

    /// The longest stock length.
    pub fn longest(&self) -> f64 {
        // Construction guarantees at least one length.
        self.lengths[self.lengths.len() - 1]
    }

    /// Smallest stock that can hold `used` length of material.
    pub fn smallest_fitting(&self, used: f64) -> Option<f64> {
        self.lengths
            .iter()
            .copied()
            .find(|&length| length - used >= -EPSILON)
    }

    /// Number of distinct stock lengths.
    pub fn len(&self) -> usize {
        self.lengths.len()
    }

    /// Always `false`; a catalog cannot be empty.
    pub fn is_empty(&self) -> bool {
        self.lengths.is_empty()
    }
}

/// A validated, immutable snapshot of one planning problem.
///
/// Solvers only ever see an `Instance`, so they never have to re-check the
/// input. Cuts are stored sorted descending.
#[cfg_attr(feature = "serialize", derive(Serialize))]
#[cfg_attr(feature = "serialize", serde(rename_all = "camelCase"))]
#[derive(Clone, Debug, PartialEq)]
pub struct Instance {
    cuts: Vec<f64>,
    catalog: StockCatalog,
    kerf: f64,
}

impl Instance {
    /// Validates the input, failing fast on anything no plan can satisfy.
    pub fn new<C, S>(cuts: C, stock_lengths: S, kerf: f64) -> Result<Self>
    where
        C: IntoIterator<Item = f64>,
        S: IntoIterator<Item = f64>,
    {
        let catalog = StockCatalog::new(stock_lengths)?;
        Self::with_catalog(cuts, catalog, kerf)
    }

    /// Like [`Instance::new`] with an already validated catalog.
    pub fn with_catalog<C>(cuts: C, catalog: StockCatalog, kerf: f64) -> Result<Self>
    where
        C: IntoIterator<Item = f64>,
    {
        if !kerf.is_finite() || kerf < 0.0 {
            return Err(Error::InvalidKerf(kerf));
        }

        let mut cuts: Vec<f64> = cuts.into_iter().collect();
        if cuts.is_empty() {
            return Err(Error::NoCuts);
        }
        if let Some(&value) = cuts.iter().find(|c| !c.is_finite() || **c <= 0.0) {
            return Err(Error::InvalidLength {
                kind: LengthKind::Cut,
                value,
            });
        }

        cuts.sort_by(|a, b| b.total_cmp(a));

        let longest = catalog.longest();
        if cuts[0] - longest > EPSILON {
            return Err(Error::CutExceedsStock {
                cut: cuts[0],
                longest,
            });
        }

        Ok(Instance {
            cuts,
            catalog,
            kerf,
        })
    }

    /// Cuts sorted longest first.
    pub fn cuts(&self) -> &[f64] {
        &self.cuts
    }

    /// The stock catalog.
    pub fn catalog(&self) -> &StockCatalog {
        &self.catalog
    }

    /// Blade width lost between adjacent cuts.
    pub fn kerf(&self) -> f64 {
        self.kerf
    }

    /// Number of cuts.
    pub fn len(&self) -> usize {
        self.cuts.len()
    }

    /// Always `false`; an instance has at least one cut.
    pub fn is_empty(&self) -> bool {
        self.cuts.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn catalog_sorts_and_dedups() {
        let catalog = StockCatalog::new([144.0, 96.0, 120.0, 96.0 + 1e-12]).unwrap();
        assert_eq!(catalog.lengths(), &[96.0, 120.0, 144.0]);
        assert_eq!(catalog.longest(), 144.0);
        assert_eq!(catalog.smallest_fitting(100.0), Some(120.0));
        assert_eq!(catalog.smallest_fitting(96.0), Some(96.0));
        assert_eq!(catalog.smallest_fitting(150.0), None);
    }

    #[test]
    fn empty_inputs_are_rejected() {
        assert!(matches!(StockCatalog::new([]), Err(Error::EmptyStock)));
        assert!(matches!(
            Instance::new([], [96.0], 0.0),
            Err(Error::NoCuts)
        ));
    }

    #[test]
    fn invalid_lengths_are_rejected() {
        assert!(matches!(
            Instance::new([10.0, -1.0], [96.0], 0.0),
            Err(Error::InvalidLength {
                kind: LengthKind::Cut,
                ..
            })
        ));
        assert!(matches!(
            Instance::new([10.0], [f64::NAN], 0.0),
            Err(Error::InvalidLength {
                kind: LengthKind::Stock,
                ..
            })
        ));
        assert!(matches!(
            Instance::new([10.0], [96.0], -0.5),
            Err(Error::InvalidKerf(_))
        ));
    }

    #[test]
    fn over_long_cut_is_named() {
        let err = Instance::new([20.0, 500.0], [96.0, 120.0], 0.125).unwrap_err();
        match err {
            Error::CutExceedsStock { cut, longest } => {
                assert_eq!(cut, 500.0);
                assert_eq!(longest, 120.0);
            }
            other => panic!("unexpected error {other:?}"),
        }
        assert!(err_message_contains(
            Instance::new([500.0], [96.0], 0.0),
            "500.000"
        ));
    }

    #[test]
    fn cuts_sorted_descending() {
        let instance = Instance::new([24.0, 52.0, 36.0], [96.0], 0.0).unwrap();
        assert_eq!(instance.cuts(), &[52.0, 36.0, 24.0]);
    }

    fn err_message_contains(result: Result<Instance>, needle: &str) -> bool {
        matches!(result, Err(ref e) if e.to_string().contains(needle))
    }
}
