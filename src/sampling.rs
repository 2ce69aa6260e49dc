//! Local sampling: exponential smoothing of the node's own inputs.

use crate::error::Error;
use crate::state::{NodeConfig, NodeState};

/// Raw readings from the node's analog inputs.
pub trait AnalogFrontEnd {
    /// Averaged conversion of level channel `channel` over `samples` reads.
    fn read_channel(&mut self, channel: usize, samples: u16) -> Result<u16, Error>;

    /// One conversion of the temperature input.
    fn read_temperature(&mut self) -> Result<u16, Error>;
}

/// `(raw * alpha + (100 - alpha) * last) / 100`, truncating.
pub fn smooth(raw: u16, last: u16, alpha: u8) -> u16 {
    let alpha = alpha.min(100) as u32;
    ((raw as u32 * alpha + (100 - alpha) * last as u32) / 100) as u16
}

/// Signed variant of [`smooth`], used for centi-degrees.
pub fn smooth_signed(raw: i32, last: i16, alpha: u8) -> i16 {
    let alpha = alpha.min(100) as i32;
    let value = (raw * alpha + (100 - alpha) * last as i32) / 100;
    value.clamp(i16::MIN as i32, i16::MAX as i32) as i16
}

const CURVE_OFFSET: f64 = 13.582;
const CURVE_SLOPE: f64 = 0.01732;
const CURVE_INTERCEPT_MV: f64 = 2230.8;
const CURVE_GAIN: f64 = -0.00866;
const CURVE_BASE_C: f64 = 30.0;

/// Transfer curve of the temperature front end, in centi-degrees Celsius.
///
/// `reference` scales counts to millivolts in units of 1/1000 mV. Readings
/// past the end of the curve fail with [`Error::Sensor`].
pub fn centi_celsius(raw: u16, reference: u16) -> Result<i32, Error> {
    let millivolt = raw as f64 * (reference as f64 / 1000.0);
    let radicand = CURVE_OFFSET * CURVE_OFFSET + CURVE_SLOPE * (CURVE_INTERCEPT_MV - millivolt);
    if radicand < 0.0 {
        return Err(Error::Sensor);
    }

    let celsius = (CURVE_OFFSET - libm::sqrt(radicand)) / CURVE_GAIN + CURVE_BASE_C;
    if !celsius.is_finite() {
        return Err(Error::Sensor);
    }

    // `as` truncates toward zero
    Ok((celsius * 100.0) as i32)
}

/// Runs one sampling pass over the enabled inputs of the local node.
///
/// A failed conversion skips that input and leaves its state as it was.
pub fn sample<F: AnalogFrontEnd>(config: &NodeConfig, state: &mut NodeState, frontend: &mut F) {
    for (j, (cfg, channel)) in config.channels.iter().zip(state.channels.iter_mut()).enumerate() {
        if !cfg.enabled {
            continue;
        }

        match frontend.read_channel(j, cfg.samples) {
            Ok(raw) => channel.update(smooth(raw, channel.value, cfg.alpha)),
            Err(err) => warn!("channel {} read failed: {}", j, err),
        }
    }

    let cfg = &config.temperature;
    if cfg.enabled {
        match frontend.read_temperature().and_then(|raw| centi_celsius(raw, cfg.reference)) {
            Ok(centi) => {
                let value = smooth_signed(centi, state.temperature.value, cfg.alpha);
                state.temperature.update(value);
            }
            Err(err) => warn!("temperature read failed: {}", err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::{ChannelState, NodeState, TemperatureState};

    #[test]
    fn smoothing_converges() {
        for alpha in 1..=100u8 {
            let mut value = 0u16;
            for _ in 0..2000 {
                value = smooth(800, value, alpha);
            }
            assert!(value <= 800);
            // Truncation stalls once a step rounds down to zero.
            assert!((800 - value) as u32 * (alpha as u32) < 100, "alpha {} stuck at {}", alpha, value);
        }
    }

    #[test]
    fn smoothing_extremes() {
        assert_eq!(smooth(640, 12, 100), 640);
        assert_eq!(smooth(640, 12, 0), 12);
        assert_eq!(smooth(640, 12, 250), 640);
        assert_eq!(smooth(100, 200, 25), 175);
        assert_eq!(smooth_signed(-1000, 0, 50), -500);
        assert_eq!(smooth_signed(2000, 1000, 0), 1000);
    }

    #[test]
    fn temperature_curve() {
        // 2230 mV sits on the 30 degree point of the curve.
        let t = centi_celsius(446, 5000).unwrap();
        assert!((3000..=3010).contains(&t), "{}", t);

        let t = centi_celsius(500, 5000).unwrap();
        assert!((1000..=1010).contains(&t), "{}", t);

        // Lower voltage, warmer.
        assert!(centi_celsius(400, 5000).unwrap() > centi_celsius(446, 5000).unwrap());
    }

    #[test]
    fn readings_past_the_curve_are_rejected() {
        assert_eq!(centi_celsius(2768, 5000), Err(Error::Sensor));
        assert_eq!(centi_celsius(4095, 5000), Err(Error::Sensor));
        assert!(centi_celsius(2768, 806).is_ok());
    }

    struct Fixed {
        level: u16,
        temperature: Option<u16>,
        samples: std::vec::Vec<u16>,
    }

    impl AnalogFrontEnd for Fixed {
        fn read_channel(&mut self, _channel: usize, samples: u16) -> Result<u16, Error> {
            self.samples.push(samples);
            Ok(self.level)
        }

        fn read_temperature(&mut self) -> Result<u16, Error> {
            self.temperature.ok_or(Error::Sensor)
        }
    }

    #[test]
    fn sample_skips_disabled_and_failed_inputs() {
        let mut config = NodeConfig::factory(0);
        config.channels[2].enabled = false;
        config.channels[0].alpha = 100;
        let mut state = NodeState::RESET;
        let mut frontend = Fixed { level: 600, temperature: None, samples: std::vec::Vec::new() };

        sample(&config, &mut state, &mut frontend);

        assert_eq!(frontend.samples, [60, 60, 60]);
        assert_eq!(state.channels[0], ChannelState { value: 600, min: 600, max: 600, valid: true });
        assert_eq!(state.channels[1].value, 150);
        assert_eq!(state.channels[2], ChannelState::RESET);
        assert_eq!(state.temperature, TemperatureState::RESET);
    }

    #[test]
    fn out_of_range_temperature_keeps_last_reading() {
        let config = NodeConfig::factory(0);
        let mut state = NodeState::RESET;
        state.temperature.update(2500);
        let before = state.temperature;
        let mut frontend = Fixed { level: 0, temperature: Some(2768), samples: std::vec::Vec::new() };

        sample(&config, &mut state, &mut frontend);

        assert_eq!(state.temperature, before);
    }
}
