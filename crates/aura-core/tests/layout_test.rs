//! Placement scenarios for the grid search and the percentage placer.
//!
//! Run with: `cargo test --test layout_test`

use aura_core::layout::{place_with, LayoutConfig};
use aura_core::{place, PercentPlacer, PercentRect, Position, Rect, Size};

#[test]
fn test_empty_viewport_scenario() {
    let viewport = Size::new(1200.0, 800.0);
    let p = place(&[], Size::new(400.0, 300.0), viewport);
    assert!((40.0..=760.0).contains(&p.x), "x = {}", p.x);
    assert!((40.0..=440.0).contains(&p.y), "y = {}", p.y);
    assert_ne!(p, Position::new(400.0, 250.0));
    assert!(p.x + 400.0 <= viewport.width && p.y + 300.0 <= viewport.height);
}

#[test]
fn test_avoids_existing_window() {
    let viewport = Size::new(1200.0, 800.0);
    let size = Size::new(400.0, 300.0);
    let first = Rect::from_parts(place(&[], size, viewport), size);
    let second = Rect::from_parts(place(&[first], size, viewport), size);
    assert_eq!(first.intersection_area(&second), 0.0);
}

#[test]
fn test_full_viewport_occupant_is_deterministic() {
    let viewport = Size::new(1200.0, 800.0);
    let size = Size::new(400.0, 300.0);
    let wall = [Rect::new(0.0, 0.0, 1200.0, 800.0)];
    let a = place(&wall, size, viewport);
    let b = place(&wall, size, viewport);
    assert_eq!(a, b);
    assert!(a.x >= 0.0 && a.y >= 0.0);
}

#[test]
fn test_window_larger_than_viewport_does_not_panic() {
    let p = place(&[], Size::new(2000.0, 2000.0), Size::new(800.0, 600.0));
    assert_eq!(p, Position::new(0.0, 0.0));
}

/// The centre candidate may only win if its overlap is strictly the smallest.
#[test]
fn test_center_candidate_never_wins_a_tie() {
    let config = LayoutConfig::default();
    // 1280x780 puts the exact centre (440, 240) on the 40px grid for a 400x300 window.
    let viewport = Size::new(1280.0, 780.0);
    let size = Size::new(400.0, 300.0);
    let center = Position::new(440.0, 240.0);

    let layouts: Vec<Vec<Rect>> = vec![
        vec![],
        vec![Rect::new(0.0, 0.0, 440.0, 780.0)],
        vec![Rect::new(0.0, 0.0, 1280.0, 240.0), Rect::new(0.0, 540.0, 1280.0, 240.0)],
        vec![Rect::new(40.0, 40.0, 400.0, 300.0), Rect::new(840.0, 40.0, 400.0, 300.0)],
    ];

    for existing in layouts {
        let chosen = place_with(&config, &existing, size, viewport);
        if chosen != center {
            continue;
        }
        let overlap = |p: Position| -> f64 {
            let r = Rect::from_parts(p, size);
            existing.iter().map(|e| r.intersection_area(e)).sum()
        };
        let center_overlap = overlap(center);
        let mut y = 40.0;
        while y <= 780.0 - 60.0 - 300.0 {
            let mut x = 40.0;
            while x <= 1280.0 - 40.0 - 400.0 {
                let p = Position::new(x, y);
                if p != center {
                    assert!(overlap(p) > center_overlap, "centre chosen over {p:?}");
                }
                x += 40.0;
            }
            y += 40.0;
        }
    }
}

#[test]
fn test_percent_placer_string_flow() {
    let placer = PercentPlacer::default();
    let open = [PercentRect::parse("10%", "10%", "30%", "35%").unwrap()];
    let (left, top) = placer.place_strings("10%", "10%", "30%", "35%", &open);
    let placed = PercentRect::parse(&left, &top, "30%", "35%").unwrap();
    assert!(!placed.to_rect(placer.basis).overlaps(&open[0].to_rect(placer.basis)));
    assert_eq!(top, "10%");
}

#[test]
fn test_percent_placer_bad_input_falls_back() {
    let placer = PercentPlacer::default();
    let (left, top) = placer.place_strings("left", "top", "30%", "35%", &[]);
    assert_eq!((left.as_str(), top.as_str()), ("10%", "10%"));
}
