#![no_std]
#![no_main]

use defmt::{info, unwrap, warn};
use embassy_executor::Spawner;
use embassy_futures::select::{select, Either};
use embassy_rp::{
    adc::{self, Adc},
    bind_interrupts,
    flash::{self, Flash, ERASE_SIZE},
    gpio::{AnyPin, Flex, Input, Pin, Pull},
    i2c::{self, I2c},
    i2c_slave::{self, I2cSlave},
    peripherals::{FLASH, I2C0, I2C1},
};
use embassy_sync::{blocking_mutex::raw::CriticalSectionRawMutex, channel::Channel, mutex::Mutex};
use embassy_time::{block_for, Duration, Ticker, Timer};
use static_cell::StaticCell;
use {defmt_rtt as _, panic_probe as _};

use pico_water_sensor::{
    bus::I2cBus,
    messages::{Command, MAX_FRAME_SIZE},
    persist::Storage,
    responder::{Received, Responder},
    role,
    sampling::AnalogFrontEnd,
    Error, Node, BUS_FREQUENCY_HZ, NUM_CHANNELS, SAMPLE_PERIOD_MS, STARTUP_DELAY_MS, UPDATE_PERIOD_MS,
};

bind_interrupts!(struct Irqs {
    I2C1_IRQ => i2c::InterruptHandler<I2C1>;
});

const FLASH_SIZE: usize = 2 * 1024 * 1024;
/// Configuration lives in the last sector.
const STORAGE_OFFSET: u32 = (FLASH_SIZE - ERASE_SIZE) as u32;

/// Charge loops before a pad counts as fully loaded.
const TOUCH_LIMIT: u16 = u16::MAX;

type NodeMutex = Mutex<CriticalSectionRawMutex, Node>;
type MasterBus = I2cBus<I2c<'static, I2C0, i2c::Blocking>>;

static NODE: StaticCell<NodeMutex> = StaticCell::new();

/// Commands from the responder, run by the control task.
static COMMANDS: Channel<CriticalSectionRawMutex, Command, 4> = Channel::new();

#[embassy_executor::main]
async fn main(spawner: Spawner) {
    let p = embassy_rp::init(Default::default());

    // role pins are active low
    let pins = [
        Input::new(p.PIN_10.degrade(), Pull::Up),
        Input::new(p.PIN_11.degrade(), Pull::Up),
        Input::new(p.PIN_12.degrade(), Pull::Up),
        Input::new(p.PIN_13.degrade(), Pull::Up),
    ];
    let pattern = pins
        .iter()
        .enumerate()
        .fold(0u8, |acc, (bit, pin)| acc | (pin.is_low() as u8) << bit);
    let node_info = role::resolve(pattern);
    info!(
        "role: index {} children {} address {:#x}",
        node_info.index,
        node_info.children,
        node_info.address()
    );

    let mut slave_config = i2c_slave::Config::default();
    slave_config.addr = node_info.address() as u16;
    let slave = I2cSlave::new(p.I2C1, p.PIN_3, p.PIN_2, Irqs, slave_config);

    let mut master_config = i2c::Config::default();
    master_config.frequency = BUS_FREQUENCY_HZ;
    let mut bus = I2cBus::new(I2c::new_blocking(p.I2C0, p.PIN_5, p.PIN_4, master_config));

    let frontend = Frontend {
        adc: Adc::new_blocking(p.ADC, adc::Config::default()),
        temperature: adc::Channel::new_pin(p.PIN_26, Pull::None),
        pads: [
            touch_pad(p.PIN_6.degrade()),
            touch_pad(p.PIN_7.degrade()),
            touch_pad(p.PIN_8.degrade()),
            touch_pad(p.PIN_9.degrade()),
        ],
    };

    let storage = FlashStorage {
        flash: Flash::new_blocking(p.FLASH),
    };

    if node_info.is_parent() {
        // children power up at the same time and need a moment
        Timer::after(Duration::from_millis(STARTUP_DELAY_MS)).await;
    }

    let node: &'static NodeMutex = NODE.init(Mutex::new(Node::new(node_info)));
    {
        let mut node = node.lock().await;
        node.reset(&mut bus);
        info!("reset: errors {:#x} context {}", node.state.errors, node.state.context);
    }

    unwrap!(spawner.spawn(responder_task(node, slave)));
    unwrap!(spawner.spawn(sample_task(node, frontend)));
    unwrap!(spawner.spawn(control_task(node, bus, storage)));
}

#[embassy_executor::task]
async fn responder_task(node: &'static NodeMutex, mut slave: I2cSlave<'static, I2C1>) -> ! {
    let mut responder = Responder::new();
    let mut buffer = [0u8; MAX_FRAME_SIZE];

    loop {
        match slave.listen(&mut buffer).await {
            Ok(i2c_slave::Command::Write(len)) => receive(&mut responder, node, &buffer[..len]).await,
            Ok(i2c_slave::Command::WriteRead(len)) => {
                receive(&mut responder, node, &buffer[..len]).await;
                respond(&mut slave, &responder).await;
            }
            Ok(i2c_slave::Command::Read) => respond(&mut slave, &responder).await,
            Ok(i2c_slave::Command::GeneralCall(_)) => {}
            Err(e) => warn!("responder: {}", e),
        }
    }
}

async fn receive(responder: &mut Responder, node: &'static NodeMutex, rx: &[u8]) {
    let received = responder.receive(rx, &*node.lock().await);

    if let Received::Command(command) = received {
        if COMMANDS.try_send(command).is_err() {
            warn!("command queue full, dropping {}", command);
        }
    }
}

async fn respond(slave: &mut I2cSlave<'static, I2C1>, responder: &Responder) {
    if let Err(e) = slave.respond_and_fill(responder.reply(), 0xff).await {
        warn!("respond: {}", e);
    }
}

#[embassy_executor::task]
async fn sample_task(node: &'static NodeMutex, mut frontend: Frontend) -> ! {
    let mut ticker = Ticker::every(Duration::from_millis(SAMPLE_PERIOD_MS));
    loop {
        ticker.next().await;
        node.lock().await.sample(&mut frontend);
    }
}

#[embassy_executor::task]
async fn control_task(node: &'static NodeMutex, mut bus: MasterBus, mut storage: FlashStorage) -> ! {
    let mut ticker = Ticker::every(Duration::from_millis(UPDATE_PERIOD_MS));
    loop {
        match select(COMMANDS.receive(), ticker.next()).await {
            Either::First(command) => {
                let mut node = node.lock().await;
                if let Err(e) = node.execute(command, &mut bus, &mut storage) {
                    warn!("{} failed: {}", command, e);
                }
            }
            Either::Second(()) => {
                // Poll the children without holding the node.
                let Some(mut cycle) = node.lock().await.begin_update() else {
                    continue;
                };
                cycle.poll(&mut bus);

                let mut node = node.lock().await;
                node.finish_update(cycle);
                info!("level {} temperature {}", node.state.level, node.state.temperature);
            }
        }
    }
}

struct Frontend {
    adc: Adc<'static, adc::Blocking>,
    temperature: adc::Channel<'static>,
    pads: [Flex<'static, AnyPin>; NUM_CHANNELS],
}

fn touch_pad(pin: AnyPin) -> Flex<'static, AnyPin> {
    let mut pad = Flex::new(pin);
    pad.set_pull(Pull::Up);
    pad
}

/// Discharges the pad, then counts until the pull-up brings it high again.
/// Water on the pad adds capacitance and slows the rise.
fn charge_time(pad: &mut Flex<'static, AnyPin>) -> u16 {
    pad.set_as_output();
    pad.set_low();
    block_for(Duration::from_micros(10));
    pad.set_as_input();

    let mut count = 0;
    while pad.is_low() && count < TOUCH_LIMIT {
        count += 1;
    }
    count
}

impl AnalogFrontEnd for Frontend {
    fn read_channel(&mut self, channel: usize, samples: u16) -> Result<u16, Error> {
        let pad = self.pads.get_mut(channel).ok_or(Error::InvalidIndex)?;
        let samples = samples.max(1) as u64;

        let mut total = 0u64;
        for _ in 0..samples {
            total += charge_time(pad) as u64;
        }
        Ok((total / samples) as u16)
    }

    fn read_temperature(&mut self) -> Result<u16, Error> {
        // first conversion after switching channels is discarded
        let _ = self.adc.blocking_read(&mut self.temperature);
        self.adc.blocking_read(&mut self.temperature).map_err(|_| Error::Sensor)
    }
}

struct FlashStorage {
    flash: Flash<'static, FLASH, flash::Blocking, FLASH_SIZE>,
}

impl Storage for FlashStorage {
    fn read(&mut self, offset: u32, buffer: &mut [u8]) -> Result<(), Error> {
        self.flash
            .blocking_read(STORAGE_OFFSET + offset, buffer)
            .map_err(|e| {
                warn!("flash read: {}", e);
                Error::Storage
            })
    }

    fn write(&mut self, offset: u32, bytes: &[u8]) -> Result<(), Error> {
        let sector = STORAGE_OFFSET;
        self.flash
            .blocking_erase(sector, sector + ERASE_SIZE as u32)
            .and_then(|_| self.flash.blocking_write(STORAGE_OFFSET + offset, bytes))
            .map_err(|e| {
                warn!("flash write: {}", e);
                Error::Storage
            })
    }
}
