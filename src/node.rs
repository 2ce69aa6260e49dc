//! One sensor node: identity, configuration and aggregated state, plus the
//! commands that act on them.

use crate::bus::Bus;
use crate::client::WaterSensor;
use crate::error::Error;
use crate::fusion;
use crate::messages::{Command, Info};
use crate::persist::{self, Storage};
use crate::role::NodeInfo;
use crate::sampling::{self, AnalogFrontEnd};
use crate::state::{config_lock, AggregateState, ConfigLock, ErrorFlag, GlobalConfig, NodeState};
use crate::{NUM_CHANNELS, NUM_NODES};

pub struct Node {
    pub info: NodeInfo,
    pub config: ConfigLock,
    pub state: AggregateState,
}

impl Node {
    pub fn new(info: NodeInfo) -> Self {
        Self {
            info,
            config: config_lock(GlobalConfig::factory()),
            state: AggregateState::new(),
        }
    }

    /// Snapshot of the configuration.
    pub fn config(&self) -> GlobalConfig {
        self.config.lock(|c| *c.borrow())
    }

    pub fn update_config<R>(&self, f: impl FnOnce(&mut GlobalConfig) -> R) -> R {
        self.config.lock(|c| f(&mut *c.borrow_mut()))
    }

    /// State of this node and its children, in slot order.
    pub fn nodes(&self) -> &[NodeState] {
        &self.state.nodes[..self.info.nodes()]
    }

    /// Contents of the READ_INFO register.
    pub fn describe(&self) -> Info {
        let nodes = self.info.nodes() as u8;
        Info {
            id: self.info.id,
            level_channels: nodes * NUM_CHANNELS as u8,
            temperature_channels: nodes,
            enabled: self.state.enabled,
            errors: self.state.errors,
            context: self.state.context,
        }
    }

    /// Runs a command received over the bus. Only load and store can fail,
    /// bus failures end up in the error mask.
    pub fn execute<B: Bus, S: Storage>(&mut self, command: Command, bus: &mut B, storage: &mut S) -> Result<(), Error> {
        info!("command {:?}", command);

        match command {
            Command::Reset => self.reset(bus),
            Command::Enable => self.enable(bus),
            Command::Load => self.load(storage)?,
            Command::Store => self.store(storage)?,
            Command::Calibrate => self.calibrate(),
            Command::Zero => self.zero(bus),
        }

        Ok(())
    }

    /// Factory configuration, cleared state, then child discovery.
    pub fn reset<B: Bus>(&mut self, bus: &mut B) {
        self.state = AggregateState::new();
        self.update_config(GlobalConfig::restore_factory);

        if !self.info.is_parent() {
            return;
        }

        let failed = self.each_child(|_, sensor| sensor.identify(bus).map(|_| ()));
        if failed != 0 {
            self.state.raise(ErrorFlag::Init, failed);
            return;
        }

        let failed = self.each_child(|_, sensor| sensor.reset(bus));
        if failed != 0 {
            self.state.raise(ErrorFlag::Reset, failed);
        }
    }

    /// Pushes each child its configuration slot and starts fusing.
    pub fn enable<B: Bus>(&mut self, bus: &mut B) {
        if self.info.is_parent() {
            let config = self.config();
            let failed = self.each_child(|index, sensor| {
                let slot = &config.nodes[index as usize];
                let mut result = Ok(());
                for (j, channel) in slot.channels.iter().enumerate() {
                    if let Err(err) = sensor.write_level_config(bus, j as u8, channel) {
                        result = Err(err);
                    }
                }
                sensor.write_temperature_config(bus, 0, &slot.temperature).and(result)
            });

            if failed != 0 {
                self.state.raise(ErrorFlag::Enable, failed);
                return;
            }
        }

        self.state.enabled = true;
    }

    /// Restarts min/max tracking here and on every child.
    pub fn zero<B: Bus>(&mut self, bus: &mut B) {
        for node in self.state.nodes.iter_mut() {
            node.zero();
        }

        if self.info.is_parent() {
            let failed = self.each_child(|_, sensor| sensor.zero(bus));
            if failed != 0 {
                self.state.raise(ErrorFlag::Zero, failed);
            }
        }
    }

    pub fn calibrate(&mut self) {
        let nodes = self.info.nodes();
        let Some(offset) = fusion::calibration_offset(&self.config(), self.nodes()) else {
            warn!("calibrate: no samples since zero");
            return;
        };

        info!("calibrated offset {}", offset);
        self.update_config(|config| {
            for node in config.nodes[..nodes].iter_mut() {
                for channel in node.channels.iter_mut() {
                    channel.offset = offset;
                }
            }
        });
    }

    pub fn load<S: Storage>(&mut self, storage: &mut S) -> Result<(), Error> {
        persist::load(&self.config, storage)
    }

    pub fn store<S: Storage>(&mut self, storage: &mut S) -> Result<(), Error> {
        persist::store(&self.config, storage)
    }

    /// One local sampling tick.
    pub fn sample<F: AnalogFrontEnd>(&mut self, frontend: &mut F) {
        let config = self.config.lock(|c| c.borrow().nodes[0]);
        sampling::sample(&config, &mut self.state.nodes[0], frontend);
    }

    /// One update tick: poll children, then fuse.
    pub fn update<B: Bus>(&mut self, bus: &mut B) {
        if let Some(mut cycle) = self.begin_update() {
            cycle.poll(bus);
            self.finish_update(cycle);
        }
    }

    /// Starts an update tick. `None` unless this is an enabled parent.
    ///
    /// The returned cycle polls without borrowing the node, so the caller can
    /// release its lock for the duration of the bus traffic.
    pub fn begin_update(&self) -> Option<Cycle> {
        if !self.info.is_parent() || !self.state.enabled {
            return None;
        }

        Some(Cycle {
            children: self.info.children,
            nodes: self.state.nodes,
            failed: 0,
        })
    }

    /// Merges polled child state and refreshes the fused level and temperature.
    pub fn finish_update(&mut self, cycle: Cycle) {
        // A reset in the meantime wins over stale data.
        if !self.state.enabled {
            return;
        }

        let children = 1..=cycle.children as usize;
        self.state.nodes[children.clone()].copy_from_slice(&cycle.nodes[children]);

        if cycle.failed != 0 {
            self.state.raise(ErrorFlag::Read, cycle.failed);
        }

        self.fuse();
    }

    fn fuse(&mut self) {
        let config = self.config();
        let level = fusion::fuse_level(&config, self.nodes());
        let temperature = fusion::fuse_temperature(&config, self.nodes(), &level);

        self.state.level = level;
        self.state.temperature = temperature;
    }

    /// Runs `f` for every child and returns the last failing 1-based index.
    fn each_child<F>(&self, mut f: F) -> u8
    where
        F: FnMut(u8, WaterSensor) -> Result<(), Error>,
    {
        let mut failed = 0;
        for index in 1..=self.info.children {
            if let Err(err) = f(index, WaterSensor::child(index)) {
                warn!("child {}: {}", index, err);
                failed = index;
            }
        }
        failed
    }
}

/// Child state collected during one update tick.
pub struct Cycle {
    children: u8,
    nodes: [NodeState; NUM_NODES],
    failed: u8,
}

impl Cycle {
    /// Reads every child's raw channels and temperature. A failed read only
    /// skips that item.
    pub fn poll<B: Bus>(&mut self, bus: &mut B) {
        for index in 1..=self.children {
            let sensor = WaterSensor::child(index);
            let slot = &mut self.nodes[index as usize];

            for (j, channel) in slot.channels.iter_mut().enumerate() {
                match sensor.read_level_raw(bus, j as u8) {
                    Ok(state) => *channel = state,
                    Err(err) => {
                        warn!("child {} channel {}: {}", index, j, err);
                        self.failed = index;
                    }
                }
            }

            match sensor.read_temperature_raw(bus, 0) {
                Ok(state) => slot.temperature = state,
                Err(err) => {
                    warn!("child {} temperature: {}", index, err);
                    self.failed = index;
                }
            }
        }
    }

    /// Last child that failed a read, 0 if none did.
    pub fn failed(&self) -> u8 {
        self.failed
    }
}
