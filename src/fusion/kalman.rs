//! Constant-acceleration Kalman filter in a 6-dimensional state space
//! `[x, y, vx, vy, ax, ay]`.
//!
//! Grounded on `fusion_processor.c` (`initialize_kalman_filter`, `predict_track_state`,
//! `update_kalman_filter`, `calculate_track_distance`) for the exact matrices and
//! constants. The design of keeping transition/observation concerns as separate, typed
//! pieces follows `examples/strawlab-strand-braid/tracking`'s split between a motion
//! model and an observation model; this implementation hand-writes both against
//! `nalgebra`'s fixed-size matrices rather than taking a direct dependency on
//! `adskalman`'s trait API.

use std::time::Instant;

use nalgebra::{SMatrix, SVector};

use crate::errors::{FusionError, FusionResult};
use crate::track::Measurement;

pub type StateVec = SVector<f64, 6>;
pub type CovMat = SMatrix<f64, 6, 6>;

const OBSERVATION_VARIANCE: f64 = 0.1;
const PROCESS_NOISE_SCALE: f64 = 0.01;

#[derive(Debug, Clone)]
pub struct KalmanState {
    pub x: StateVec,
    pub p: CovMat,
    pub last_update: Instant,
    pub initialized: bool,
}

impl KalmanState {
    /// `x = [m.x, m.y, v*cos(phi), v*sin(phi), 0, 0]`, `phi = heading_deg * pi/180`.
    /// `P = diag(0.5, 0.5, 2.0, 2.0, 5.0, 5.0)`.
    pub fn initialize(m: &Measurement) -> Self {
        let phi = m.heading_deg.to_radians();
        let x = StateVec::new(
            m.position.x,
            m.position.y,
            m.velocity_scalar * phi.cos(),
            m.velocity_scalar * phi.sin(),
            0.0,
            0.0,
        );
        let p = CovMat::from_diagonal(&SVector::<f64, 6>::new(0.5, 0.5, 2.0, 2.0, 5.0, 5.0));
        Self {
            x,
            p,
            last_update: m.timestamp,
            initialized: true,
        }
    }

    fn transition_matrix(dt: f64) -> CovMat {
        let half_dt2 = 0.5 * dt * dt;
        #[rustfmt::skip]
        let f = CovMat::new(
            1.0, 0.0,  dt, 0.0, half_dt2, 0.0,
            0.0, 1.0, 0.0,  dt, 0.0, half_dt2,
            0.0, 0.0, 1.0, 0.0,  dt, 0.0,
            0.0, 0.0, 0.0, 1.0, 0.0,  dt,
            0.0, 0.0, 0.0, 0.0, 1.0, 0.0,
            0.0, 0.0, 0.0, 0.0, 0.0, 1.0,
        );
        f
    }

    /// `x <- F*x`, `P <- F*P*F^T + Q`, `Q = (0.01*dt)*I_6`. `last_update` is untouched —
    /// only a measurement update advances it.
    pub fn predict(&mut self, dt: f64) {
        let f = Self::transition_matrix(dt);
        self.x = f * self.x;
        self.p = f * self.p * f.transpose();
        let q = PROCESS_NOISE_SCALE * dt;
        for i in 0..6 {
            self.p[(i, i)] += q;
        }
    }

    /// `H = [[1,0,0,0,0,0],[0,1,0,0,0,0]]`, `R = 0.1*I_2`. Skips the update (returning
    /// `Numerical`) when the innovation covariance is singular, leaving the track intact.
    pub fn update(&mut self, pos: (f64, f64), timestamp: Instant) -> FusionResult<()> {
        let h = Self::observation_matrix();
        let z = SVector::<f64, 2>::new(pos.0, pos.1);
        let r = SMatrix::<f64, 2, 2>::from_diagonal(&SVector::<f64, 2>::new(
            OBSERVATION_VARIANCE,
            OBSERVATION_VARIANCE,
        ));

        let innovation = z - h * self.x;
        let s = h * self.p * h.transpose() + r;
        let s_inv = s
            .try_inverse()
            .ok_or_else(|| FusionError::Numerical("singular innovation covariance".to_string()))?;

        let k = self.p * h.transpose() * s_inv;
        self.x += k * innovation;
        let identity = CovMat::identity();
        self.p = (identity - k * h) * self.p;
        self.last_update = timestamp;
        Ok(())
    }

    fn observation_matrix() -> nalgebra::SMatrix<f64, 2, 6> {
        #[rustfmt::skip]
        let h = nalgebra::SMatrix::<f64, 2, 6>::new(
            1.0, 0.0, 0.0, 0.0, 0.0, 0.0,
            0.0, 1.0, 0.0, 0.0, 0.0, 0.0,
        );
        h
    }

    /// Diagonal Mahalanobis-flavored distance: `var = P[diag] + sigma_r^2` per axis.
    pub fn distance(&self, pos: (f64, f64)) -> f64 {
        let dx = pos.0 - self.x[0];
        let dy = pos.1 - self.x[1];
        let var_x = self.p[(0, 0)] + OBSERVATION_VARIANCE;
        let var_y = self.p[(1, 1)] + OBSERVATION_VARIANCE;
        ((dx * dx) / var_x + (dy * dy) / var_y).sqrt()
    }

    pub fn position(&self) -> (f64, f64) {
        (self.x[0], self.x[1])
    }

    pub fn velocity(&self) -> f64 {
        (self.x[2] * self.x[2] + self.x[3] * self.x[3]).sqrt()
    }

    pub fn heading_deg(&self) -> f64 {
        self.x[3].atan2(self.x[2]).to_degrees()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::track::{SensorPosition, TargetType};
    use approx::assert_relative_eq;

    fn measurement_at(x: f64, y: f64, v: f64, heading: f64) -> Measurement {
        Measurement {
            id: 1,
            target_type: TargetType::Vehicle,
            position: SensorPosition::planar(x, y),
            velocity_scalar: v,
            heading_deg: heading,
            confidence: 0.7,
            timestamp: Instant::now(),
            sensor_id: 1,
        }
    }

    #[test]
    fn initialize_sets_state_from_measurement() {
        let m = measurement_at(100.0, 100.0, 10.0, 0.0);
        let k = KalmanState::initialize(&m);
        assert_relative_eq!(k.x[0], 100.0);
        assert_relative_eq!(k.x[1], 100.0);
        assert_relative_eq!(k.x[2], 10.0, epsilon = 1e-9);
        assert_relative_eq!(k.x[3], 0.0, epsilon = 1e-9);
        assert_relative_eq!(k.x[4], 0.0);
        assert_relative_eq!(k.x[5], 0.0);
    }

    #[test]
    fn predict_advances_position_by_velocity_times_dt() {
        let m = measurement_at(0.0, 0.0, 10.0, 0.0);
        let mut k = KalmanState::initialize(&m);
        k.predict(1.0);
        assert_relative_eq!(k.x[0], 10.0, epsilon = 1e-6);
    }

    #[test]
    fn update_moves_estimate_toward_measurement() {
        let m = measurement_at(100.0, 100.0, 10.0, 0.0);
        let mut k = KalmanState::initialize(&m);
        k.predict(0.1);
        k.update((100.5, 100.1), Instant::now()).unwrap();
        assert!(k.x[0] > 100.2 && k.x[0] < 100.6);
    }

    #[test]
    fn filter_converges_under_gaussian_noise() {
        // F3: constant-velocity target with N(0, sigma^2) position noise, sigma^2 = 0.1.
        use rand::Rng;
        let sigma = 0.1_f64.sqrt();
        let mut rng = rand::rng();
        let true_v = 5.0;
        let m0 = measurement_at(0.0, 0.0, true_v, 0.0);
        let mut k = KalmanState::initialize(&m0);
        let dt = 0.05;
        let mut true_x = 0.0;
        let mut squared_err = 0.0;
        let n = 40;
        for _ in 0..n {
            true_x += true_v * dt;
            k.predict(dt);
            let noisy_x = true_x + rng.random_range(-3.0 * sigma..3.0 * sigma);
            k.update((noisy_x, 0.0), Instant::now()).unwrap();
            squared_err += (k.x[0] - true_x).powi(2);
        }
        let rmse = (squared_err / n as f64).sqrt();
        assert!(rmse <= 1.5 * sigma, "rmse {rmse} exceeded 1.5*sigma {}", 1.5 * sigma);
    }

    #[test]
    fn distance_grows_with_displacement() {
        let m = measurement_at(0.0, 0.0, 0.0, 0.0);
        let k = KalmanState::initialize(&m);
        let near = k.distance((0.1, 0.1));
        let far = k.distance((100.0, 100.0));
        assert!(far > near);
    }
}
