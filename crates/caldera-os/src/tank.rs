use std::cell::RefCell;
use std::rc::Rc;

use tracing::{debug, trace};

use caldera::config::ConfigParams;
use caldera::controller::Sensors;
use caldera::machine::{Actions, Request};
use caldera::operation::Operation;
use caldera::sensor::{SensorId, SensorKind, Temperature};
use caldera::timestamp::Clock;

// Specific heat capacity of water, in J/(kg·K).
const WATER_HEAT_CAPACITY: f64 = 4186.0;
// Time constant of the heat loss towards the ambient, in seconds.
const LOSS_TIME_CONSTANT: f64 = 48.0 * 3600.0;

/// Bus identities of the simulated sensors, indexed by
/// [`SensorKind::index`].
pub const SENSOR_IDS: [SensorId; 2] = [
    SensorId([0x28, 0x43, 0x41, 0x4C, 0x44, 0x45, 0x52, 0x01]),
    SensorId([0x28, 0x43, 0x41, 0x4C, 0x44, 0x45, 0x52, 0x02]),
];

/// A simulated water tank with a heating element.
///
/// The water heats up while the element is on and slowly cools down
/// towards the ambient temperature.
#[derive(Debug, Clone)]
pub struct Tank {
    water: f64,
    ambient: f64,
    litres: u16,
    watts: u16,
    heating: bool,
    updated_secs: u32,
}

impl Tank {
    /// Creates a [`Tank`] filled with water at the ambient temperature.
    #[must_use]
    pub fn new(ambient: Temperature) -> Self {
        let ambient = f64::from(ambient.centi()) / 100.0;
        let defaults = ConfigParams::DEFAULT;
        Self {
            water: ambient,
            ambient,
            litres: defaults.tank_litres,
            watts: defaults.heater_watts,
            heating: false,
            updated_secs: 0,
        }
    }

    /// Sets the volume and the heating element power.
    pub fn resize(&mut self, litres: u16, watts: u16) {
        self.litres = litres.max(1);
        self.watts = watts;
    }

    /// Turns the heating element on or off.
    pub fn set_heating(&mut self, on: bool) {
        self.heating = on;
    }

    /// Checks whether the heating element is on.
    #[must_use]
    pub const fn is_heating(&self) -> bool {
        self.heating
    }

    /// Advances the simulation up to `now_secs`.
    pub fn advance(&mut self, now_secs: u32) {
        let elapsed = f64::from(now_secs.saturating_sub(self.updated_secs));
        self.updated_secs = self.updated_secs.max(now_secs);

        if self.heating {
            let capacity = f64::from(self.litres) * WATER_HEAT_CAPACITY;
            self.water += f64::from(self.watts) * elapsed / capacity;
        }
        let loss = (elapsed / LOSS_TIME_CONSTANT).min(1.0);
        self.water -= (self.water - self.ambient) * loss;
    }

    /// Returns the water temperature.
    #[must_use]
    pub fn water(&self) -> Temperature {
        to_temperature(self.water)
    }

    /// Returns the ambient temperature, seen by the inlet sensor.
    #[must_use]
    pub fn ambient(&self) -> Temperature {
        to_temperature(self.ambient)
    }
}

fn to_temperature(degrees: f64) -> Temperature {
    let centi = (degrees * 100.0).round().clamp(f64::from(i16::MIN), f64::from(i16::MAX));
    Temperature::from_centi(centi as i16)
}

/// The tank sensors, read through the simulated bus.
#[derive(Debug)]
pub struct TankSensors<C> {
    tank: Rc<RefCell<Tank>>,
    clock: C,
    present: [bool; 2],
    converting: bool,
}

impl<C: Clock> TankSensors<C> {
    /// Creates the [`TankSensors`] of a tank, sampled on `clock`.
    #[must_use]
    pub fn new(tank: Rc<RefCell<Tank>>, clock: C) -> Self {
        Self {
            tank,
            clock,
            present: [false; 2],
            converting: false,
        }
    }
}

impl<C: Clock> Sensors for TankSensors<C> {
    fn setup(&mut self, config: &ConfigParams) {
        self.tank
            .borrow_mut()
            .resize(config.tank_litres, config.heater_watts);

        let ids = [config.primary_sensor, config.secondary_sensor];
        for kind in SensorKind::ALL {
            let id = ids[kind.index()];
            let present = id.is_any() || id == SENSOR_IDS[kind.index()];
            if !present {
                debug!("Sensor {id} not found on the bus");
            }
            self.present[kind.index()] = present;
        }
    }

    fn initiate_readout(&mut self) {
        self.converting = true;
    }

    fn complete_readout(&mut self, op: &mut Operation) {
        if !std::mem::take(&mut self.converting) {
            return;
        }

        let mut tank = self.tank.borrow_mut();
        tank.advance(self.clock.elapsed_secs());
        let temperatures = [tank.water(), tank.ambient()];
        trace!(
            "Water at {} °C, heating {}",
            temperatures[0],
            tank.is_heating()
        );

        for kind in SensorKind::ALL {
            let measurement = self.present[kind.index()].then_some(temperatures[kind.index()]);
            let reading = op.sensor_mut(kind);
            *reading = reading.measured(measurement);
        }
    }
}

/// The [`Actions`] of the simulated appliance.
#[derive(Debug)]
pub struct TankActions {
    tank: Rc<RefCell<Tank>>,
    requests: Vec<Request>,
}

impl TankActions {
    /// Creates the [`TankActions`] driving the heating element of a tank.
    #[must_use]
    pub const fn new(tank: Rc<RefCell<Tank>>) -> Self {
        Self {
            tank,
            requests: Vec::new(),
        }
    }

    /// Takes the pending operator requests.
    pub fn take_requests(&mut self) -> Vec<Request> {
        std::mem::take(&mut self.requests)
    }
}

impl Actions for TankActions {
    fn set_heater(&mut self, on: bool) {
        self.tank.borrow_mut().set_heating(on);
    }

    fn request(&mut self, request: Request) {
        self.requests.push(request);
    }
}

#[cfg(test)]
mod tests {
    use std::cell::{Cell, RefCell};
    use std::rc::Rc;

    use caldera::config::ConfigParams;
    use caldera::controller::Sensors;
    use caldera::machine::{Actions, Request};
    use caldera::operation::Operation;
    use caldera::sensor::{SensorId, SensorStatus, Temperature};
    use caldera::timestamp::Clock;

    use super::{SENSOR_IDS, Tank, TankActions, TankSensors};

    #[derive(Clone)]
    struct SharedClock(Rc<Cell<u32>>);

    impl Clock for SharedClock {
        fn elapsed_secs(&self) -> u32 {
            self.0.get()
        }

        fn wait_for_next_second(&mut self, current: u32) {
            self.0.set(current + 1);
        }
    }

    fn tank() -> Rc<RefCell<Tank>> {
        Rc::new(RefCell::new(Tank::new(Temperature::from_degrees(15))))
    }

    #[test]
    fn test_heating() {
        let mut tank = Tank::new(Temperature::from_degrees(15));
        tank.resize(10, 4186);

        tank.set_heating(true);
        tank.advance(100);

        // 4186 W heat 10 litres by 0.1 °C per second, minus a tiny loss.
        let water = tank.water().centi();
        assert!((2490..=2500).contains(&water), "{water}");
        assert_eq!(tank.ambient(), Temperature::from_degrees(15));
    }

    #[test]
    fn test_cooling() {
        let mut tank = Tank::new(Temperature::from_degrees(15));
        tank.resize(10, 4186);
        tank.set_heating(true);
        tank.advance(200);
        tank.set_heating(false);

        let hot = tank.water();
        tank.advance(200 + 3600);
        assert!(tank.water() < hot);
        assert!(tank.water() > Temperature::from_degrees(15));
    }

    #[test]
    fn test_readout() {
        let tank = tank();
        let clock = SharedClock(Rc::new(Cell::new(0)));
        let mut sensors = TankSensors::new(Rc::clone(&tank), clock);
        let mut op = Operation::new();

        sensors.setup(&ConfigParams::DEFAULT);
        sensors.complete_readout(&mut op);
        assert_eq!(op.primary().status, SensorStatus::Unknown);

        sensors.initiate_readout();
        sensors.complete_readout(&mut op);
        assert_eq!(op.primary().usable(), Some(Temperature::from_degrees(15)));
        assert_eq!(op.sensors[1].usable(), Some(Temperature::from_degrees(15)));
    }

    #[test]
    fn test_setup_resizes_the_tank() {
        let tank = tank();
        let time = Rc::new(Cell::new(0));
        let mut sensors = TankSensors::new(Rc::clone(&tank), SharedClock(Rc::clone(&time)));
        let mut op = Operation::new();

        sensors.setup(&ConfigParams::DEFAULT);
        let config = ConfigParams {
            tank_litres: 10,
            heater_watts: 4186,
            ..ConfigParams::DEFAULT
        };
        sensors.setup(&config);

        tank.borrow_mut().set_heating(true);
        time.set(100);
        sensors.initiate_readout();
        sensors.complete_readout(&mut op);

        let water = op.primary().usable().unwrap().centi();
        assert!((2490..=2500).contains(&water), "{water}");
    }

    #[test]
    fn test_unknown_sensor_is_absent() {
        let tank = tank();
        let clock = SharedClock(Rc::new(Cell::new(0)));
        let mut sensors = TankSensors::new(tank, clock);
        let mut op = Operation::new();

        let config = ConfigParams {
            primary_sensor: SENSOR_IDS[0],
            secondary_sensor: SensorId([0x28, 0, 0, 0, 0, 0, 0, 0x99]),
            ..ConfigParams::DEFAULT
        };
        sensors.setup(&config);
        sensors.initiate_readout();
        sensors.complete_readout(&mut op);

        assert_eq!(op.primary().status, SensorStatus::Ok);
        assert_eq!(op.sensors[1].status, SensorStatus::Absent);
    }

    #[test]
    fn test_actions() {
        let tank = tank();
        let mut actions = TankActions::new(Rc::clone(&tank));

        actions.set_heater(true);
        assert!(tank.borrow().is_heating());
        actions.request(Request::Log);

        assert_eq!(actions.take_requests(), vec![Request::Log]);
        assert!(actions.take_requests().is_empty());
    }
}
