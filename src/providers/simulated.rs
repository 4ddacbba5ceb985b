use parking_lot::RwLock;
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::sync::Arc;

use super::map::GridMap;
use super::motion::{Body, Motion, Positioning};
use crate::types::{AgentId, MotionStatus, RelativePosition, TilePos};

/// Which tile each simulated body currently occupies.
#[derive(Debug, Clone, Default)]
pub struct Occupancy {
    inner: Arc<RwLock<BTreeMap<AgentId, TilePos>>>,
}

impl Occupancy {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn claim(&self, agent: AgentId, tile: TilePos) {
        self.inner.write().insert(agent, tile);
    }

    pub fn release(&self, agent: AgentId) {
        self.inner.write().remove(&agent);
    }

    pub fn occupied_by_other(&self, agent: AgentId, tile: &TilePos) -> bool {
        self.inner
            .read()
            .iter()
            .any(|(id, occupied)| *id != agent && occupied == tile)
    }

    pub fn snapshot(&self) -> BTreeMap<AgentId, TilePos> {
        self.inner.read().clone()
    }
}

#[derive(Debug, Clone, Copy)]
enum Maneuver {
    Shift { steps: i32, reverse: bool },
    Turn { quarter_turns: i32 },
}

/// Kinematic stand-in for a robot: one tile per physics step along a
/// breadth-first route that steers around bodies seen at planning time, and
/// contact whenever the next tile is held by another body.
#[derive(Debug)]
pub struct SimulatedBody {
    id: AgentId,
    tile: TilePos,
    heading: (i32, i32),
    path: VecDeque<TilePos>,
    pending: Option<Maneuver>,
    status: MotionStatus,
    colliding: bool,
    map: GridMap,
    occupancy: Occupancy,
}

impl SimulatedBody {
    pub fn new(id: AgentId, start: TilePos, map: GridMap, occupancy: Occupancy) -> Self {
        occupancy.claim(id, start);
        Self {
            id,
            tile: start,
            heading: (1, 0),
            path: VecDeque::new(),
            pending: None,
            status: MotionStatus::Idle,
            colliding: false,
            map,
            occupancy,
        }
    }

    pub fn heading(&self) -> (i32, i32) {
        self.heading
    }

    fn try_enter(&mut self, next: TilePos) -> bool {
        if !self.map.is_open(&next) || self.occupancy.occupied_by_other(self.id, &next) {
            self.colliding = true;
            return false;
        }
        self.tile = next;
        self.colliding = false;
        self.occupancy.claim(self.id, next);
        true
    }

    fn apply(&mut self, maneuver: Maneuver) {
        match maneuver {
            Maneuver::Shift { steps, reverse } => {
                let sign = if reverse { -1 } else { 1 };
                for _ in 0..steps {
                    let next = TilePos::new(
                        self.tile.x + sign * self.heading.0,
                        self.tile.y + sign * self.heading.1,
                    );
                    if !self.try_enter(next) {
                        break;
                    }
                }
            }
            Maneuver::Turn { quarter_turns } => {
                for _ in 0..quarter_turns.rem_euclid(4) {
                    self.heading = (-self.heading.1, self.heading.0);
                }
            }
        }
    }
}

impl Motion for SimulatedBody {
    fn stop_current_task(&mut self) {
        self.path.clear();
        self.pending = None;
        if self.status == MotionStatus::Moving {
            self.status = MotionStatus::Stopping;
        }
    }

    fn path_and_move_to(&mut self, target: TilePos) -> bool {
        let others: BTreeSet<TilePos> = self
            .occupancy
            .snapshot()
            .into_iter()
            .filter(|(id, _)| *id != self.id)
            .map(|(_, tile)| tile)
            .collect();
        // Bodies in the way only reroute; a route through them still counts.
        let route = self
            .map
            .shortest_path_avoiding(self.tile, target, &others)
            .or_else(|| self.map.shortest_path(self.tile, target));
        let Some(route) = route else {
            return false;
        };

        self.path = route.into();
        self.pending = None;
        self.status = if self.path.is_empty() {
            MotionStatus::Idle
        } else {
            MotionStatus::Moving
        };
        true
    }

    fn move_by(&mut self, distance: f32, reverse: bool) {
        self.path.clear();
        self.pending = Some(Maneuver::Shift {
            steps: distance.abs().ceil() as i32,
            reverse,
        });
        self.status = MotionStatus::Moving;
    }

    fn rotate(&mut self, angle_degrees: f32) {
        self.path.clear();
        self.pending = Some(Maneuver::Turn {
            quarter_turns: (angle_degrees / 90.0).round() as i32,
        });
        self.status = MotionStatus::Moving;
    }

    fn is_colliding(&self) -> bool {
        self.colliding
    }

    fn status(&self) -> MotionStatus {
        self.status
    }
}

impl Positioning for SimulatedBody {
    fn current_tile(&self) -> TilePos {
        self.tile
    }

    fn relative_position_to(&self, tile: TilePos) -> RelativePosition {
        let dx = (tile.x - self.tile.x) as f32;
        let dy = (tile.y - self.tile.y) as f32;
        let bearing = dy.atan2(dx).to_degrees();
        let facing = (self.heading.1 as f32).atan2(self.heading.0 as f32).to_degrees();
        let mut angle = bearing - facing;
        while angle > 180.0 {
            angle -= 360.0;
        }
        while angle <= -180.0 {
            angle += 360.0;
        }

        RelativePosition {
            distance: self.tile.distance_to(&tile),
            angle,
        }
    }
}

impl Body for SimulatedBody {
    fn step_physics(&mut self) {
        match self.status {
            MotionStatus::Idle => {}
            MotionStatus::Stopping => self.status = MotionStatus::Idle,
            MotionStatus::Moving => {
                if let Some(maneuver) = self.pending.take() {
                    self.apply(maneuver);
                    self.status = MotionStatus::Idle;
                    return;
                }

                if let Some(next) = self.path.front().copied() {
                    let (dx, dy) = (next.x - self.tile.x, next.y - self.tile.y);
                    if self.try_enter(next) {
                        self.heading = (dx.signum(), dy.signum());
                        self.path.pop_front();
                    }
                }

                if self.path.is_empty() {
                    self.status = MotionStatus::Idle;
                }
            }
        }
    }
}

impl Drop for SimulatedBody {
    fn drop(&mut self) {
        self.occupancy.release(self.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn body_at(id: AgentId, tile: TilePos, occupancy: &Occupancy) -> SimulatedBody {
        SimulatedBody::new(id, tile, GridMap::new(5, 5), occupancy.clone())
    }

    #[test]
    fn test_body_walks_shortest_path() {
        let occupancy = Occupancy::new();
        let mut body = body_at(1, TilePos::new(0, 0), &occupancy);

        assert!(body.path_and_move_to(TilePos::new(2, 1)));
        assert_eq!(body.status(), MotionStatus::Moving);

        for _ in 0..3 {
            body.step_physics();
        }

        assert_eq!(body.current_tile(), TilePos::new(2, 1));
        assert_eq!(body.status(), MotionStatus::Idle);
        assert_eq!(occupancy.snapshot()[&1], TilePos::new(2, 1));
    }

    #[test]
    fn test_body_collides_with_occupied_tile() {
        let occupancy = Occupancy::new();
        let mut body = body_at(1, TilePos::new(0, 0), &occupancy);

        body.path_and_move_to(TilePos::new(2, 0));
        let _blocker = body_at(2, TilePos::new(1, 0), &occupancy);
        body.step_physics();

        assert!(body.is_colliding());
        assert_eq!(body.current_tile(), TilePos::new(0, 0));
        assert_eq!(body.status(), MotionStatus::Moving);
    }

    #[test]
    fn test_body_routes_around_wall() {
        let occupancy = Occupancy::new();
        let map = GridMap::new(5, 3).with_blocked([TilePos::new(3, 0), TilePos::new(3, 1)]);
        let mut body = SimulatedBody::new(1, TilePos::new(2, 0), map, occupancy);

        assert!(body.path_and_move_to(TilePos::new(4, 0)));
        for _ in 0..6 {
            body.step_physics();
        }

        assert_eq!(body.current_tile(), TilePos::new(4, 0));
        assert_eq!(body.status(), MotionStatus::Idle);
        assert!(!body.is_colliding());
    }

    #[test]
    fn test_plans_around_parked_body() {
        let occupancy = Occupancy::new();
        let mut body = body_at(1, TilePos::new(0, 0), &occupancy);
        let _parked = body_at(2, TilePos::new(1, 0), &occupancy);

        assert!(body.path_and_move_to(TilePos::new(2, 0)));
        for _ in 0..4 {
            body.step_physics();
            assert!(!body.is_colliding());
        }
        assert_eq!(body.current_tile(), TilePos::new(2, 0));
    }

    #[test]
    fn test_walled_off_target_is_refused() {
        let occupancy = Occupancy::new();
        let wall = [TilePos::new(3, 0), TilePos::new(3, 1), TilePos::new(3, 2)];
        let map = GridMap::new(5, 3).with_blocked(wall);
        let mut body = SimulatedBody::new(1, TilePos::new(2, 1), map, occupancy);

        assert!(!body.path_and_move_to(TilePos::new(4, 1)));
        assert_eq!(body.status(), MotionStatus::Idle);
    }

    #[test]
    fn test_reverse_moves_against_heading() {
        let occupancy = Occupancy::new();
        let mut body = body_at(1, TilePos::new(2, 2), &occupancy);

        body.move_by(0.5, true);
        body.step_physics();

        assert_eq!(body.current_tile(), TilePos::new(1, 2));
        assert_eq!(body.status(), MotionStatus::Idle);
        assert!(!body.is_colliding());
    }

    #[test]
    fn test_rotate_turns_heading() {
        let occupancy = Occupancy::new();
        let mut body = body_at(1, TilePos::new(2, 2), &occupancy);

        body.rotate(90.0);
        body.step_physics();

        assert_eq!(body.heading(), (0, 1));
    }

    #[test]
    fn test_relative_position_angle() {
        let occupancy = Occupancy::new();
        let body = body_at(1, TilePos::new(0, 0), &occupancy);

        let relative = body.relative_position_to(TilePos::new(0, 3));
        assert!((relative.distance - 3.0).abs() < 1e-6);
        assert!((relative.angle - 90.0).abs() < 1e-4);
    }

    #[test]
    fn test_drop_releases_occupancy() {
        let occupancy = Occupancy::new();
        {
            let _body = body_at(7, TilePos::new(1, 1), &occupancy);
            assert!(occupancy.snapshot().contains_key(&7));
        }
        assert!(!occupancy.snapshot().contains_key(&7));
    }
}
