//! Pass resolution.

/// Sentinel for "derive this dimension from the base size".
pub const AUTO_SIZE: u32 = 0;

/// Effective render size of a pass.
///
/// The base size is the size of the whole pipeline (usually the window). A pass may scale it
/// down, or pin a preferred width/height; `width()`/`height()` report the effective size. The
/// revision only moves when the effective size changes.
#[derive(Clone, Debug, PartialEq)]
pub struct Resolution {
    base_width: u32,
    base_height: u32,
    preferred_width: u32,
    preferred_height: u32,
    scale: f32,
    revision: u64,
}

impl Default for Resolution {
    fn default() -> Self {
        Self {
            base_width: 1,
            base_height: 1,
            preferred_width: AUTO_SIZE,
            preferred_height: AUTO_SIZE,
            scale: 1.0,
            revision: 0,
        }
    }
}

impl Resolution {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            base_width: width.max(1),
            base_height: height.max(1),
            ..Self::default()
        }
    }

    pub fn width(&self) -> u32 {
        if self.preferred_width != AUTO_SIZE {
            return self.preferred_width;
        }
        ((self.base_width as f32 * self.scale).round() as u32).max(1)
    }

    pub fn height(&self) -> u32 {
        if self.preferred_height != AUTO_SIZE {
            return self.preferred_height;
        }
        ((self.base_height as f32 * self.scale).round() as u32).max(1)
    }

    pub fn size(&self) -> (u32, u32) {
        (self.width(), self.height())
    }

    pub fn base_size(&self) -> (u32, u32) {
        (self.base_width, self.base_height)
    }

    pub fn scale(&self) -> f32 {
        self.scale
    }

    pub fn revision(&self) -> u64 {
        self.revision
    }

    fn apply(&mut self, change: impl FnOnce(&mut Self)) -> bool {
        let before = self.size();
        change(self);
        let changed = self.size() != before;
        if changed {
            self.revision += 1;
        }
        changed
    }

    /// Returns `true` if the effective size changed.
    pub fn set_base_size(&mut self, width: u32, height: u32) -> bool {
        self.apply(|r| {
            r.base_width = width.max(1);
            r.base_height = height.max(1);
        })
    }

    /// Pins either dimension; pass [`AUTO_SIZE`] to follow the base size again.
    pub fn set_preferred_size(&mut self, width: u32, height: u32) -> bool {
        self.apply(|r| {
            r.preferred_width = width;
            r.preferred_height = height;
        })
    }

    pub fn set_scale(&mut self, scale: f32) -> bool {
        self.apply(|r| r.scale = scale.max(f32::EPSILON))
    }

    /// Copies the size settings (not the revision) of `other`.
    pub fn copy_from(&mut self, other: &Resolution) -> bool {
        self.apply(|r| {
            r.base_width = other.base_width;
            r.base_height = other.base_height;
            r.preferred_width = other.preferred_width;
            r.preferred_height = other.preferred_height;
            r.scale = other.scale;
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scale_applies_to_the_base_size() {
        let mut res = Resolution::new(800, 600);
        res.set_scale(0.5);
        assert_eq!(res.size(), (400, 300));
    }

    #[test]
    fn preferred_size_overrides_scale() {
        let mut res = Resolution::new(800, 600);
        res.set_scale(0.5);
        res.set_preferred_size(128, AUTO_SIZE);
        assert_eq!(res.size(), (128, 300));
    }

    #[test]
    fn revision_moves_only_on_effective_change() {
        let mut res = Resolution::new(800, 600);
        let rev = res.revision();
        assert!(!res.set_base_size(800, 600));
        assert_eq!(res.revision(), rev);
        assert!(res.set_base_size(1024, 768));
        assert_eq!(res.revision(), rev + 1);
    }

    #[test]
    fn never_reports_zero() {
        let mut res = Resolution::new(0, 0);
        res.set_scale(0.0);
        assert_eq!(res.size(), (1, 1));
    }
}
