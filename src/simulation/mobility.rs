//! Node mobility models.
//!
//! Positions are pure functions of time: a model stores the position and
//! velocity it had at its last direction change and integrates from there on
//! every query. `RandomWalk2d` folds the straight-line motion back into its
//! rectangle, which is the same as reflecting off each wall it hits.

use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use rand_distr::{Distribution, Uniform};
use std::f64::consts::TAU;

use super::clock::SimTime;
use super::geometry::{Point, Rectangle, Vector};

/// Capability shared by every mobility model.
pub trait Mobility {
    fn position_at(&self, time: SimTime) -> Point;
    fn velocity_at(&self, time: SimTime) -> Vector;
}

#[derive(Debug, Clone)]
pub struct ConstantPosition {
    position: Point,
}

impl ConstantPosition {
    pub fn new(position: Point) -> Self {
        Self { position }
    }
}

impl Mobility for ConstantPosition {
    fn position_at(&self, _time: SimTime) -> Point {
        self.position
    }

    fn velocity_at(&self, _time: SimTime) -> Vector {
        Vector::ZERO
    }
}

/// Bounded random walk with a new random velocity every `interval`.
#[derive(Debug, Clone)]
pub struct RandomWalk2d {
    bounds: Rectangle,
    speed: Uniform<f64>,
    heading: Uniform<f64>,
    interval: SimTime,
    rng: ChaCha8Rng,
    origin: Point,
    origin_time: SimTime,
    velocity: Vector,
}

impl RandomWalk2d {
    /// `speed_min <= speed_max` and a positive `interval` are checked by scenario validation.
    pub fn new(bounds: Rectangle, speed_min: f64, speed_max: f64, interval: SimTime, start: Point, seed: u64) -> Self {
        let mut walk = Self {
            bounds,
            speed: Uniform::new_inclusive(speed_min, speed_max),
            heading: Uniform::new(0.0, TAU),
            interval,
            rng: ChaCha8Rng::seed_from_u64(seed),
            origin: bounds.clamp(start),
            origin_time: SimTime::ZERO,
            velocity: Vector::ZERO,
        };
        walk.velocity = walk.sample_velocity();
        walk
    }

    pub fn bounds(&self) -> &Rectangle {
        &self.bounds
    }

    pub fn interval(&self) -> SimTime {
        self.interval
    }

    fn sample_velocity(&mut self) -> Vector {
        let speed = self.speed.sample(&mut self.rng);
        let heading = self.heading.sample(&mut self.rng);
        Vector::from_polar(speed, heading)
    }

    /// Re-anchor at the current position and draw a new velocity.
    /// Returns when the next change is due.
    pub fn change_direction(&mut self, time: SimTime) -> SimTime {
        self.origin = self.position_at(time);
        self.origin_time = time;
        self.velocity = self.sample_velocity();
        log::trace!(
            "random walk re-anchored at ({:.2}, {:.2}) with velocity ({:.2}, {:.2}) at {}",
            self.origin.x,
            self.origin.y,
            self.velocity.x,
            self.velocity.y,
            time
        );
        time + self.interval
    }

    fn elapsed(&self, time: SimTime) -> f64 {
        (time - self.origin_time).as_secs_f64().max(0.0)
    }
}

/// Fold an unbounded coordinate into `[min, max]`.
/// The flag is true when the motion is currently mirrored (odd number of wall hits).
fn fold(value: f64, min: f64, max: f64) -> (f64, bool) {
    let span = max - min;
    if span <= 0.0 {
        return (min, false);
    }
    let u = (value - min).rem_euclid(2.0 * span);
    if u <= span {
        ((min + u).clamp(min, max), false)
    } else {
        ((max - (u - span)).clamp(min, max), true)
    }
}

impl Mobility for RandomWalk2d {
    fn position_at(&self, time: SimTime) -> Point {
        let dt = self.elapsed(time);
        let (x, _) = fold(self.origin.x + self.velocity.x * dt, self.bounds.min_x, self.bounds.max_x);
        let (y, _) = fold(self.origin.y + self.velocity.y * dt, self.bounds.min_y, self.bounds.max_y);
        Point { x, y }
    }

    fn velocity_at(&self, time: SimTime) -> Vector {
        let dt = self.elapsed(time);
        let (_, flip_x) = fold(self.origin.x + self.velocity.x * dt, self.bounds.min_x, self.bounds.max_x);
        let (_, flip_y) = fold(self.origin.y + self.velocity.y * dt, self.bounds.min_y, self.bounds.max_y);
        Vector {
            x: if flip_x { -self.velocity.x } else { self.velocity.x },
            y: if flip_y { -self.velocity.y } else { self.velocity.y },
        }
    }
}

/// Mobility model installed on a node.
#[derive(Debug, Clone)]
pub enum MobilityModel {
    Constant(ConstantPosition),
    RandomWalk(RandomWalk2d),
}

impl MobilityModel {
    /// Apply a scheduled direction change; `None` for models that never change.
    pub fn change_direction(&mut self, time: SimTime) -> Option<SimTime> {
        match self {
            MobilityModel::Constant(_) => None,
            MobilityModel::RandomWalk(walk) => Some(walk.change_direction(time)),
        }
    }

    /// First direction change after installation.
    pub fn first_change(&self) -> Option<SimTime> {
        match self {
            MobilityModel::Constant(_) => None,
            MobilityModel::RandomWalk(walk) => Some(walk.interval()),
        }
    }
}

impl Mobility for MobilityModel {
    fn position_at(&self, time: SimTime) -> Point {
        match self {
            MobilityModel::Constant(m) => m.position_at(time),
            MobilityModel::RandomWalk(m) => m.position_at(time),
        }
    }

    fn velocity_at(&self, time: SimTime) -> Vector {
        match self {
            MobilityModel::Constant(m) => m.velocity_at(time),
            MobilityModel::RandomWalk(m) => m.velocity_at(time),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn small_field() -> Rectangle {
        Rectangle {
            min_x: 0.0,
            max_x: 10.0,
            min_y: 0.0,
            max_y: 10.0,
        }
    }

    #[test]
    fn fold_reflects_at_walls() {
        assert_eq!(fold(12.0, 0.0, 10.0), (8.0, true));
        assert_eq!(fold(-3.0, 0.0, 10.0), (3.0, true));
        assert_eq!(fold(25.0, 0.0, 10.0), (5.0, false));
        assert_eq!(fold(4.0, 0.0, 10.0), (4.0, false));
        assert_eq!(fold(7.0, 2.0, 2.0), (2.0, false));
    }

    #[test]
    fn constant_position_never_moves() {
        let m = ConstantPosition::new(Point::new(3.0, -4.0));
        assert_eq!(m.position_at(SimTime::from_secs(100)), Point::new(3.0, -4.0));
        assert_eq!(m.velocity_at(SimTime::ZERO), Vector::ZERO);
    }

    #[test]
    fn velocity_reverses_after_wall_hit() {
        let mut walk = RandomWalk2d::new(small_field(), 5.0, 5.0, SimTime::from_secs(1), Point::new(5.0, 5.0), 1);
        walk.velocity = Vector { x: 5.0, y: 0.0 };
        // 5 m to the wall, then 5 m back.
        assert_eq!(walk.position_at(SimTime::from_secs(2)), Point::new(5.0, 5.0));
        assert!(walk.velocity_at(SimTime::from_secs(2)).x < 0.0);
        assert!(walk.velocity_at(SimTime::from_millis(500)).x > 0.0);
    }

    #[test]
    fn same_seed_same_track() {
        let a = RandomWalk2d::new(Rectangle::default(), 2.0, 4.0, SimTime::from_secs(1), Point::ORIGIN, 42);
        let b = RandomWalk2d::new(Rectangle::default(), 2.0, 4.0, SimTime::from_secs(1), Point::ORIGIN, 42);
        let mut a = MobilityModel::RandomWalk(a);
        let mut b = MobilityModel::RandomWalk(b);
        for s in 1..20 {
            let t = SimTime::from_secs(s);
            assert_eq!(a.change_direction(t), b.change_direction(t));
            assert_eq!(a.position_at(t + SimTime::from_millis(300)), b.position_at(t + SimTime::from_millis(300)));
        }
    }

    #[test]
    fn speed_stays_in_configured_range() {
        let mut walk = RandomWalk2d::new(Rectangle::default(), 2.0, 4.0, SimTime::from_secs(1), Point::ORIGIN, 7);
        for s in 1..50 {
            walk.change_direction(SimTime::from_secs(s));
            let speed = walk.velocity_at(SimTime::from_secs(s)).magnitude();
            assert!((2.0..=4.0 + 1e-9).contains(&speed), "speed {speed}");
        }
    }

    proptest! {
        #[test]
        fn random_walk_stays_inside_bounds(
            seed in any::<u64>(),
            speed in 0.5f64..400.0,
            queries in proptest::collection::vec(0i64..120_000, 1..64),
        ) {
            let field = small_field();
            let mut walk = RandomWalk2d::new(field, speed / 2.0, speed, SimTime::from_secs(1), Point::new(5.0, 5.0), seed);
            let mut sorted = queries.clone();
            sorted.sort_unstable();
            let mut next_change = walk.interval();
            for q in sorted {
                let t = SimTime::from_millis(q);
                while next_change <= t {
                    next_change = walk.change_direction(next_change);
                }
                let p = walk.position_at(t);
                prop_assert!(field.contains(&p), "escaped to {:?}", p);
            }
        }
    }
}
