//! Window placement.
//!
//! Two strategies live here:
//!
//! - [`place`]: pixel-space grid search. Every grid cell inside the padded viewport is scored
//!   by overlap area against the visible windows, plus a small bias toward the top-left and a
//!   large penalty near the exact viewport centre. Lowest score wins; ties go to the first
//!   cell in row-major scan order.
//! - [`PercentPlacer`]: the lighter flow for positions written as percentage strings. Rects
//!   are normalised onto a 1200×800 basis and a colliding candidate is nudged right, wrapping
//!   to the next row and back to the top, for at most 15 attempts.
//!
//! Both are pure apart from the last-resort random fallback in [`place`].

use serde::{Deserialize, Serialize};
use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Position {
    pub x: f64,
    pub y: f64,
}

impl Position {
    pub const fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    pub fn offset(self, dx: f64, dy: f64) -> Self {
        Self::new(self.x + dx, self.y + dy)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Size {
    pub width: f64,
    pub height: f64,
}

impl Size {
    pub const fn new(width: f64, height: f64) -> Self {
        Self { width, height }
    }
}

/// Axis-aligned rectangle in pixel space.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Rect {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl Rect {
    pub const fn new(x: f64, y: f64, width: f64, height: f64) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    pub fn from_parts(position: Position, size: Size) -> Self {
        Self::new(position.x, position.y, size.width, size.height)
    }

    pub fn right(&self) -> f64 {
        self.x + self.width
    }

    pub fn bottom(&self) -> f64 {
        self.y + self.height
    }

    pub fn center(&self) -> Position {
        Position::new(self.x + self.width / 2.0, self.y + self.height / 2.0)
    }

    /// Area shared with `other`; zero when disjoint or merely touching.
    pub fn intersection_area(&self, other: &Rect) -> f64 {
        let w = self.right().min(other.right()) - self.x.max(other.x);
        let h = self.bottom().min(other.bottom()) - self.y.max(other.y);
        if w <= 0.0 || h <= 0.0 {
            0.0
        } else {
            w * h
        }
    }

    pub fn overlaps(&self, other: &Rect) -> bool {
        self.x < other.right()
            && other.x < self.right()
            && self.y < other.bottom()
            && other.y < self.bottom()
    }
}

/// Tunables for the grid search.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LayoutConfig {
    pub grid_step: f64,
    /// Inset from the left, top and right edges.
    pub padding: f64,
    /// Inset from the bottom edge (room for the dock).
    pub bottom_inset: f64,
    /// Per-pixel bias applied to `x + y`.
    pub position_bias: f64,
    /// Distance from the viewport centre inside which a candidate is penalised.
    pub center_radius: f64,
    pub center_penalty: f64,
}

impl Default for LayoutConfig {
    fn default() -> Self {
        Self {
            grid_step: 40.0,
            padding: 40.0,
            bottom_inset: 60.0,
            position_bias: 0.1,
            center_radius: 50.0,
            center_penalty: 5000.0,
        }
    }
}

/// Places a window of `size` with the default [`LayoutConfig`].
pub fn place(existing: &[Rect], size: Size, viewport: Size) -> Position {
    place_with(&LayoutConfig::default(), existing, size, viewport)
}

/// Grid search placement. `existing` should contain only visible (non-minimised) windows.
pub fn place_with(config: &LayoutConfig, existing: &[Rect], size: Size, viewport: Size) -> Position {
    match best_candidate(config, existing, size, viewport) {
        Some(pos) => pos,
        None => random_fallback(size, viewport),
    }
}

/// Score for a candidate rectangle; lower is better.
pub fn score_candidate(config: &LayoutConfig, candidate: &Rect, existing: &[Rect], viewport: Size) -> f64 {
    let overlap: f64 = existing.iter().map(|r| candidate.intersection_area(r)).sum();
    let bias = (candidate.x + candidate.y) * config.position_bias;
    let c = candidate.center();
    let dx = c.x - viewport.width / 2.0;
    let dy = c.y - viewport.height / 2.0;
    let penalty = if (dx * dx + dy * dy).sqrt() <= config.center_radius {
        config.center_penalty
    } else {
        0.0
    };
    overlap + bias + penalty
}

fn best_candidate(config: &LayoutConfig, existing: &[Rect], size: Size, viewport: Size) -> Option<Position> {
    if config.grid_step <= 0.0 {
        return None;
    }
    let min_x = config.padding;
    let min_y = config.padding;
    let max_x = viewport.width - config.padding - size.width;
    let max_y = viewport.height - config.bottom_inset - size.height;
    if max_x < min_x || max_y < min_y {
        return None;
    }

    let mut best: Option<(f64, Position)> = None;
    let mut y = min_y;
    while y <= max_y {
        let mut x = min_x;
        while x <= max_x {
            let candidate = Rect::new(x, y, size.width, size.height);
            let score = score_candidate(config, &candidate, existing, viewport);
            if best.map(|(s, _)| score < s).unwrap_or(true) {
                best = Some((score, Position::new(x, y)));
            }
            x += config.grid_step;
        }
        y += config.grid_step;
    }
    best.map(|(_, pos)| pos)
}

/// Uniformly random position inside `viewport` minus `size`. Non-deterministic.
fn random_fallback(size: Size, viewport: Size) -> Position {
    let bits = uuid::Uuid::new_v4().as_u128();
    let rx = (bits & 0xFFFF_FFFF) as f64 / u32::MAX as f64;
    let ry = ((bits >> 32) & 0xFFFF_FFFF) as f64 / u32::MAX as f64;
    let span_x = (viewport.width - size.width).max(0.0);
    let span_y = (viewport.height - size.height).max(0.0);
    Position::new((rx * span_x).floor(), (ry * span_y).floor())
}

// ---------------------------------------------------------------------------
// Percentage-based placement
// ---------------------------------------------------------------------------

/// Percent of the logical basis, parsed from strings like `"12.5%"`.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Default)]
pub struct Percent(pub f64);

impl Percent {
    /// Accepts `"12.5%"`, `"12.5"` and surrounding whitespace.
    pub fn parse(s: &str) -> Option<Self> {
        let s = s.trim();
        let s = s.strip_suffix('%').unwrap_or(s).trim();
        s.parse::<f64>().ok().filter(|v| v.is_finite()).map(Percent)
    }

    pub fn of(self, total: f64) -> f64 {
        self.0 * total / 100.0
    }

    pub fn from_px(px: f64, total: f64) -> Self {
        if total <= 0.0 {
            Percent(0.0)
        } else {
            Percent(px * 100.0 / total)
        }
    }
}

impl std::fmt::Display for Percent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let rounded = (self.0 * 100.0).round() / 100.0;
        write!(f, "{}%", rounded)
    }
}

/// A rectangle whose coordinates are percentages of the basis.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct PercentRect {
    pub left: Percent,
    pub top: Percent,
    pub width: Percent,
    pub height: Percent,
}

impl PercentRect {
    /// Parses four percentage strings; `None` if any is malformed.
    pub fn parse(left: &str, top: &str, width: &str, height: &str) -> Option<Self> {
        Some(Self {
            left: Percent::parse(left)?,
            top: Percent::parse(top)?,
            width: Percent::parse(width)?,
            height: Percent::parse(height)?,
        })
    }

    pub fn to_rect(&self, basis: Size) -> Rect {
        Rect::new(
            self.left.of(basis.width),
            self.top.of(basis.height),
            self.width.of(basis.width),
            self.height.of(basis.height),
        )
    }
}

/// Percentage-string placement with nudge-and-wrap collision avoidance.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PercentPlacer {
    pub basis: Size,
    /// Nudge distance in basis pixels, applied on both axes.
    pub step: f64,
    /// Where a wrapped row or column restarts.
    pub margin: f64,
    pub max_attempts: usize,
}

impl Default for PercentPlacer {
    fn default() -> Self {
        Self {
            basis: Size::new(1200.0, 800.0),
            step: 40.0,
            margin: 20.0,
            max_attempts: 15,
        }
    }
}

impl PercentPlacer {
    /// Returns `(left, top)` for `candidate`, nudged until it clears `existing`.
    ///
    /// After `max_attempts` collisions the last attempted position is returned even if it
    /// still overlaps.
    pub fn place(&self, candidate: PercentRect, existing: &[PercentRect]) -> (Percent, Percent) {
        let occupied: Vec<Rect> = existing.iter().map(|r| r.to_rect(self.basis)).collect();
        let mut rect = candidate.to_rect(self.basis);

        let mut attempts = 0;
        while occupied.iter().any(|o| rect.overlaps(o)) {
            if attempts >= self.max_attempts {
                warn!(
                    attempts,
                    left = rect.x,
                    top = rect.y,
                    "percent placement gave up; window may overlap"
                );
                break;
            }
            attempts += 1;
            rect.x += self.step;
            if rect.right() > self.basis.width {
                rect.x = self.margin;
                rect.y += self.step;
                if rect.bottom() > self.basis.height {
                    rect.y = self.margin;
                }
            }
        }

        (
            Percent::from_px(rect.x, self.basis.width),
            Percent::from_px(rect.y, self.basis.height),
        )
    }

    /// String-in, string-out convenience for callers holding CSS-style values.
    pub fn place_strings(
        &self,
        left: &str,
        top: &str,
        width: &str,
        height: &str,
        existing: &[PercentRect],
    ) -> (String, String) {
        let candidate = PercentRect::parse(left, top, width, height).unwrap_or(PercentRect {
            left: Percent(10.0),
            top: Percent(10.0),
            width: Percent::parse(width).unwrap_or(Percent(30.0)),
            height: Percent::parse(height).unwrap_or(Percent(35.0)),
        });
        let (l, t) = self.place(candidate, existing);
        (l.to_string(), t.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn intersection_area_cases() {
        let a = Rect::new(0.0, 0.0, 100.0, 100.0);
        assert_eq!(a.intersection_area(&Rect::new(50.0, 50.0, 100.0, 100.0)), 2500.0);
        assert_eq!(a.intersection_area(&Rect::new(100.0, 0.0, 10.0, 10.0)), 0.0);
        assert_eq!(a.intersection_area(&Rect::new(300.0, 300.0, 10.0, 10.0)), 0.0);
        assert!(!a.overlaps(&Rect::new(100.0, 0.0, 10.0, 10.0)));
    }

    #[test]
    fn center_candidate_is_penalised() {
        let cfg = LayoutConfig::default();
        let viewport = Size::new(1200.0, 800.0);
        let center = Rect::new(400.0, 250.0, 400.0, 300.0);
        let corner = Rect::new(40.0, 40.0, 400.0, 300.0);
        assert!(score_candidate(&cfg, &center, &[], viewport) > score_candidate(&cfg, &corner, &[], viewport));
    }

    #[test]
    fn fallback_stays_inside_viewport() {
        let viewport = Size::new(300.0, 200.0);
        let size = Size::new(250.0, 190.0);
        for _ in 0..20 {
            let p = place(&[], size, viewport);
            assert!(p.x >= 0.0 && p.x <= 50.0);
            assert!(p.y >= 0.0 && p.y <= 10.0);
        }
    }

    #[test]
    fn percent_parse_and_display() {
        assert_eq!(Percent::parse(" 12.5% "), Some(Percent(12.5)));
        assert_eq!(Percent::parse("40"), Some(Percent(40.0)));
        assert_eq!(Percent::parse("abc%"), None);
        assert_eq!(Percent(12.5).to_string(), "12.5%");
        assert_eq!(Percent(10.0).to_string(), "10%");
    }

    #[test]
    fn percent_placer_keeps_free_candidate() {
        let placer = PercentPlacer::default();
        let candidate = PercentRect::parse("10%", "10%", "25%", "25%").unwrap();
        let (l, t) = placer.place(candidate, &[]);
        assert_eq!((l, t), (Percent(10.0), Percent(10.0)));
    }

    #[test]
    fn percent_placer_nudges_right() {
        let placer = PercentPlacer::default();
        let occupied = PercentRect::parse("10%", "10%", "10%", "10%").unwrap();
        let candidate = PercentRect::parse("10%", "10%", "10%", "10%").unwrap();
        let (l, t) = placer.place(candidate, &[occupied]);
        // 10% of 1200 = 120px wide; three 40px nudges clear it.
        assert_eq!(l.of(1200.0), 240.0);
        assert_eq!(t, Percent(10.0));
    }

    #[test]
    fn percent_placer_wraps_to_next_row() {
        let placer = PercentPlacer::default();
        // Right-hand strip fully occupied on the candidate's row.
        let occupied = PercentRect::parse("80%", "0%", "20%", "20%").unwrap();
        let candidate = PercentRect::parse("80%", "0%", "20%", "20%").unwrap();
        let (l, t) = placer.place(candidate, &[occupied]);
        assert!((l.of(1200.0) - 20.0).abs() < 1e-9);
        assert!((t.of(800.0) - 40.0).abs() < 1e-9);
    }

    #[test]
    fn percent_placer_gives_up_after_cap() {
        let placer = PercentPlacer::default();
        let everything = PercentRect::parse("0%", "0%", "100%", "100%").unwrap();
        let candidate = PercentRect::parse("10%", "10%", "20%", "20%").unwrap();
        // Every position collides; the last attempted position is returned.
        let (l, t) = placer.place(candidate, &[everything]);
        assert!(l.0 >= 0.0 && l.0 <= 100.0);
        assert!(t.0 >= 0.0 && t.0 <= 100.0);
    }

    #[test]
    fn place_strings_falls_back_on_malformed_input() {
        let placer = PercentPlacer::default();
        let (l, t) = placer.place_strings("oops", "10%", "30%", "35%", &[]);
        assert_eq!(l, "10%");
        assert_eq!(t, "10%");
    }
}
