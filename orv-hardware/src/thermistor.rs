//! NTC thermistor conversion
//!
//! Each thermistor input is a voltage divider: a fixed series resistor to the ADC
//! reference, the thermistor to ground, the ADC on the midpoint. Resistance is
//! converted to temperature with the beta model.

const KELVIN_OFFSET: f64 = 273.15;

/// Beta-model parameters for a thermistor input.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ThermistorModel {
    pub beta: f64,
    /// Resistance at `nominal_c`
    pub nominal_ohms: f64,
    pub nominal_c: f64,
    pub series_ohms: f64,
    /// Full-scale ADC reading
    pub adc_max_counts: u16,
}

impl ThermistorModel {
    /// 10 kΩ / β 3950 probe behind a 10 kΩ series resistor.
    pub fn new(adc_max_counts: u16) -> Self {
        Self {
            beta: 3950.0,
            nominal_ohms: 10_000.0,
            nominal_c: 25.0,
            series_ohms: 10_000.0,
            adc_max_counts,
        }
    }

    /// Convert ADC counts to Celsius.
    ///
    /// Returns `None` at either rail, where the probe is open or shorted and the
    /// reading carries no temperature.
    pub fn counts_to_celsius(&self, counts: u16) -> Option<f64> {
        if counts == 0 || counts >= self.adc_max_counts {
            return None;
        }

        let counts = f64::from(counts);
        let max = f64::from(self.adc_max_counts);
        let resistance = self.series_ohms * counts / (max - counts);

        let inverse_kelvin = 1.0 / (self.nominal_c + KELVIN_OFFSET)
            + (resistance / self.nominal_ohms).ln() / self.beta;
        Some(1.0 / inverse_kelvin - KELVIN_OFFSET)
    }

    /// Counts the ADC would read at a temperature, clamped off the rails.
    pub fn celsius_to_counts(&self, celsius: f64) -> u16 {
        let kelvin = celsius + KELVIN_OFFSET;
        let resistance = self.nominal_ohms
            * (self.beta * (1.0 / kelvin - 1.0 / (self.nominal_c + KELVIN_OFFSET))).exp();

        let max = f64::from(self.adc_max_counts);
        let counts = (max * resistance / (self.series_ohms + resistance)).round();
        counts.clamp(1.0, max - 1.0) as u16
    }
}
