use std::cmp;
use std::time::Duration;

/// Clock granularity G from RFC 6298.
const GRANULARITY: Duration = Duration::from_millis(10);

/// Karn + Jacobson retransmission-timeout estimator.
///
/// Samples are only fed from segments that were never retransmitted (Karn's
/// rule, enforced by the caller via the slot's retry flag). Until the first
/// sample arrives the RTO stays at its configured initial value.
#[derive(Debug, Clone)]
pub struct RttEstimator {
    srtt: Option<Duration>,
    rttvar: Duration,
    rto: Duration,
    rto_min: Duration,
    rto_max: Duration,
}

impl RttEstimator {
    pub fn new(rto_initial: Duration, rto_min: Duration, rto_max: Duration) -> Self {
        RttEstimator {
            srtt: None,
            rttvar: Duration::ZERO,
            rto: rto_initial,
            rto_min,
            rto_max,
        }
    }

    pub fn rto(&self) -> Duration {
        self.rto
    }

    pub fn srtt(&self) -> Option<Duration> {
        self.srtt
    }

    pub fn set_clamps(&mut self, rto_min: Duration, rto_max: Duration) {
        self.rto_min = rto_min;
        self.rto_max = rto_max;
        self.rto = self.rto.clamp(self.rto_min, self.rto_max);
    }

    /// Feed one unambiguous round-trip measurement.
    /*
    -   When the first RTT measurement R is made, the host MUST set

            SRTT <- R
            RTTVAR <- R/2
            RTO <- SRTT + max (G, K*RTTVAR)

        where K = 4.

    -   When a subsequent RTT measurement R' is made, a host MUST set

            RTTVAR <- (1 - beta) * RTTVAR + beta * |SRTT - R'|
            SRTT <- (1 - alpha) * SRTT + alpha * R'

        The value of SRTT used in the update to RTTVAR is its value
        before updating SRTT itself using the second assignment.  That
        is, updating RTTVAR and SRTT MUST be computed in the above
        order.

        The above SHOULD be computed using alpha=1/8 and beta=1/4.

    -   After the computation, a host MUST update

            RTO <- SRTT + max (G, K*RTTVAR)
    */
    pub fn sample(&mut self, r: Duration) {
        match self.srtt {
            None => {
                self.srtt = Some(r);
                self.rttvar = r / 2;
            }
            Some(srtt) => {
                let delta = if srtt > r { srtt - r } else { r - srtt };
                self.rttvar = self.rttvar.mul_f64(0.75) + delta.mul_f64(0.25);
                self.srtt = Some(srtt.mul_f64(0.875) + r.mul_f64(0.125));
            }
        }

        self.rto = self.srtt.unwrap() + cmp::max(GRANULARITY, 4 * self.rttvar);
        self.rto = self.rto.clamp(self.rto_min, self.rto_max);
    }

    /// Exponential backoff on retransmission; a later unambiguous sample
    /// re-seeds the timeout.
    pub fn backoff(&mut self) {
        self.rto = cmp::min(self.rto * 2, self.rto_max);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn estimator() -> RttEstimator {
        RttEstimator::new(
            Duration::from_secs(1),
            Duration::from_millis(200),
            Duration::from_secs(60),
        )
    }

    #[test]
    fn initial_rto_until_first_sample() {
        let est = estimator();
        assert_eq!(est.rto(), Duration::from_secs(1));
        assert_eq!(est.srtt(), None);
    }

    #[test]
    fn first_sample_seeds_srtt_and_rttvar() {
        let mut est = estimator();
        est.sample(Duration::from_millis(400));

        assert_eq!(est.srtt(), Some(Duration::from_millis(400)));
        // rto = srtt + max(G, 4 * r/2) = 400ms + 800ms
        assert_eq!(est.rto(), Duration::from_millis(1200));
    }

    #[test]
    fn subsequent_samples_smooth() {
        let mut est = estimator();
        est.sample(Duration::from_millis(400));
        est.sample(Duration::from_millis(400));

        // A steady RTT shrinks the variance term toward the mean.
        assert_eq!(est.srtt(), Some(Duration::from_millis(400)));
        assert_eq!(est.rto(), Duration::from_millis(1000));
    }

    #[test]
    fn rto_clamped_to_minimum() {
        let mut est = estimator();
        for _ in 0..32 {
            est.sample(Duration::from_millis(1));
        }
        assert_eq!(est.rto(), Duration::from_millis(200));
    }

    #[test]
    fn rto_clamped_to_maximum() {
        let mut est = estimator();
        est.sample(Duration::from_secs(100));
        assert_eq!(est.rto(), Duration::from_secs(60));
    }

    #[test]
    fn backoff_doubles_until_resample() {
        let mut est = estimator();
        est.backoff();
        assert_eq!(est.rto(), Duration::from_secs(2));
        est.backoff();
        assert_eq!(est.rto(), Duration::from_secs(4));

        // Backoff saturates at the maximum.
        for _ in 0..8 {
            est.backoff();
        }
        assert_eq!(est.rto(), Duration::from_secs(60));

        // A fresh sample re-seeds.
        est.sample(Duration::from_millis(300));
        assert!(est.rto() < Duration::from_secs(2));
    }
}
