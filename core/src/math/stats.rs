pub struct StatsHelper;

impl StatsHelper {
    /// Mean of the finite values, `None` when there are none.
    pub fn nanmean<'a, I>(values: I) -> Option<f64>
    where
        I: IntoIterator<Item = &'a f64>,
    {
        let (sum, count) = values
            .into_iter()
            .filter(|v| v.is_finite())
            .fold((0.0, 0usize), |(sum, count), &v| (sum + v, count + 1));
        if count == 0 {
            None
        } else {
            Some(sum / count as f64)
        }
    }

    /// Population variance of the finite values.
    pub fn nanvar<'a, I>(values: I) -> Option<f64>
    where
        I: IntoIterator<Item = &'a f64> + Clone,
    {
        let mean = Self::nanmean(values.clone())?;
        let (sum_sq, count) = values
            .into_iter()
            .filter(|v| v.is_finite())
            .fold((0.0, 0usize), |(sum, count), &v| {
                (sum + (v - mean) * (v - mean), count + 1)
            });
        Some(sum_sq / count as f64)
    }

    pub fn nanstd<'a, I>(values: I) -> Option<f64>
    where
        I: IntoIterator<Item = &'a f64> + Clone,
    {
        Self::nanvar(values).map(f64::sqrt)
    }

    /// Median of the finite values (mean of the middle pair for even counts).
    pub fn nanmedian<'a, I>(values: I) -> Option<f64>
    where
        I: IntoIterator<Item = &'a f64>,
    {
        let mut finite: Vec<f64> = values.into_iter().copied().filter(|v| v.is_finite()).collect();
        if finite.is_empty() {
            return None;
        }
        finite.sort_by(f64::total_cmp);
        let mid = finite.len() / 2;
        if finite.len() % 2 == 0 {
            Some((finite[mid - 1] + finite[mid]) / 2.0)
        } else {
            Some(finite[mid])
        }
    }

    /// Rounds half away from zero to `decimals` places.
    pub fn round_to(value: f64, decimals: u32) -> f64 {
        if !value.is_finite() {
            return value;
        }
        let factor = 10f64.powi(decimals as i32);
        let rounded = (value * factor).round() / factor;
        // Normalise -0.0 so exported text never shows "-0".
        if rounded == 0.0 {
            0.0
        } else {
            rounded
        }
    }
}
