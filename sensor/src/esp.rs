use std::{
    cell::RefCell,
    collections::HashMap,
    fmt::Debug,
    rc::Rc,
    thread,
    time::{Duration, Instant},
};

use anyhow::{anyhow, Context};
use embedded_hal_bus::i2c::RefCellDevice;
use embedded_svc::{
    http::{client::Client as HttpClient, Method, Status},
    io::Read,
    wifi::{AuthMethod, ClientConfiguration, Configuration},
};
use esp_idf_hal::{
    delay::{Delay, Ets, TickType},
    gpio::{AnyIOPin, AnyInputPin, AnyOutputPin, Input, Output, PinDriver, Pull},
    i2c::{I2c, I2cConfig, I2cDriver, I2C0, I2C1},
    peripheral::Peripheral,
    units::Hertz,
};
use esp_idf_svc::{
    eventloop::EspSystemEventLoop,
    hal::{modem::Modem, prelude::Peripherals},
    http::client::{Configuration as HttpClientConfiguration, EspHttpConnection},
    log::EspLogger,
    nvs::{EspDefaultNvsPartition, EspNvs},
    ota::EspOta,
    wifi::{BlockingWifi, EspWifi},
};
use log::{debug, info, warn};

use solarstill_common::{
    config::NetworkConfig,
    decide_streamed, detect_model,
    sensors::{Hx711, Hx711Gain, Ltr390, Sht30, Tsl2591, Vl53l0x, WindSensor},
    BusPins, BusSlot, ChannelConfig, Driver, DriverState, FirmwareDigest, GroupRuntime,
    HardwareConfig, Hx711Config, ModelId, ModelPins, Probe, SensorError, SensorSource,
    StationConfig, UpdateDecision, UploadError, WindConfig,
};

const NVS_NAMESPACE: &str = "solarstill";
const NVS_STATION_KEY: &str = "station_json";
const NVS_FIRMWARE_KEY: &str = "fw_sha256";
const NVS_CONFIG_BUFFER: usize = 8192;

const MAX_HTTP_BODY: usize = 512;
const OTA_CHUNK_SIZE: usize = 4096;
const WATCHDOG_TIMEOUT_SEC: u32 = 90;
const WIFI_RESTART_GRACE_MS: u64 = 300_000;
const WIFI_CONNECT_ATTEMPTS: u32 = 5;
const WIFI_RETRY_DELAY_MS: u64 = 3_000;
const SCAN_TIMEOUT_MS: u64 = 10;
const HX711_SAMPLES: usize = 5;

type BusHandle = &'static RefCell<I2cDriver<'static>>;
type SharedI2c = RefCellDevice<'static, I2cDriver<'static>>;
type InputLine = PinDriver<'static, AnyInputPin, Input>;
type PulseLine = PinDriver<'static, AnyIOPin, Input>;
type OutputLine = PinDriver<'static, AnyOutputPin, Output>;
type Shared<T> = Rc<RefCell<Reconnecting<T>>>;

/// Device that is connected on first use. A bus fault drops it so the next
/// read starts over from a fresh init sequence.
struct Reconnecting<T> {
    label: String,
    connect: Box<dyn FnMut() -> Result<T, SensorError>>,
    device: Option<T>,
}

impl<T> Reconnecting<T> {
    fn shared(
        label: String,
        connect: impl FnMut() -> Result<T, SensorError> + 'static,
    ) -> Shared<T> {
        Rc::new(RefCell::new(Self {
            label,
            connect: Box::new(connect),
            device: None,
        }))
    }

    fn with<R>(
        &mut self,
        read: impl FnOnce(&mut T) -> Result<R, SensorError>,
    ) -> Result<R, SensorError> {
        let mut device = match self.device.take() {
            Some(device) => device,
            None => {
                let device = (self.connect)()?;
                info!("{} ready", self.label);
                device
            }
        };

        let result = read(&mut device);
        if matches!(result, Err(SensorError::Bus(_))) {
            warn!("{} dropped after bus fault; reconnecting next cycle", self.label);
        } else {
            self.device = Some(device);
        }
        result
    }
}

/// I2C buses and load cell of the model detected on this board.
struct ModelHardware {
    model: ModelId,
    primary: BusHandle,
    secondary: BusHandle,
    hx711: Shared<Hx711<InputLine, OutputLine, Ets>>,
}

impl ModelHardware {
    fn bring_up(
        pins: &ModelPins,
        i2c0: I2C0,
        i2c1: I2C1,
        baudrate_hz: u32,
    ) -> anyhow::Result<Self> {
        let primary = open_bus(i2c0, pins.primary, baudrate_hz)
            .with_context(|| format!("failed to open {}1 bus", pins.model.as_str()))?;
        let secondary = open_bus(i2c1, pins.secondary, baudrate_hz)
            .with_context(|| format!("failed to open {}2 bus", pins.model.as_str()))?;

        let hx = pins.hx711;
        let hx711 = Reconnecting::shared(
            format!("HX711 {} (GPIO{}/{})", pins.model.as_str(), hx.dout, hx.sck),
            move || connect_hx711(hx),
        );

        Ok(Self {
            model: pins.model,
            primary,
            secondary,
            hx711,
        })
    }
}

/// Builds one probe per configured channel, sharing a driver wherever two
/// channels read the same part.
struct ProbeFactory {
    hardware: Option<ModelHardware>,
    wind: Shared<WindSensor<PulseLine, Ets>>,
    sht30: HashMap<(BusSlot, u8), Shared<Sht30<SharedI2c, Delay>>>,
    tsl2591: HashMap<BusSlot, Shared<Tsl2591<SharedI2c, Delay>>>,
}

impl ProbeFactory {
    fn new(hardware: Option<ModelHardware>, wind: WindConfig) -> Self {
        Self {
            hardware,
            wind: Reconnecting::shared(format!("anemometer (GPIO{})", wind.pin), move || {
                connect_wind(wind)
            }),
            sht30: HashMap::new(),
            tsl2591: HashMap::new(),
        }
    }

    fn probes_for(&mut self, model: ModelId, channels: &[ChannelConfig]) -> Vec<Box<dyn Probe>> {
        channels
            .iter()
            .map(|channel| self.probe(model, channel))
            .collect()
    }

    fn probe(&mut self, model: ModelId, channel: &ChannelConfig) -> Box<dyn Probe> {
        if channel.source == SensorSource::WindPulses {
            let wind = self.wind.clone();
            return Box::new(move || -> Result<f32, SensorError> {
                wind.borrow_mut().with(|sensor| sensor.speed())
            });
        }

        let Some((primary, secondary, hx711)) = self
            .hardware
            .as_ref()
            .filter(|hw| hw.model == model)
            .map(|hw| (hw.primary, hw.secondary, hw.hx711.clone()))
        else {
            return detached(model, &channel.name);
        };
        let handle_for = |slot: BusSlot| match slot {
            BusSlot::Primary => primary,
            BusSlot::Secondary => secondary,
        };
        let label = |part: &str, slot: BusSlot| {
            let suffix = match slot {
                BusSlot::Primary => 1,
                BusSlot::Secondary => 2,
            };
            format!("{part} on {}{suffix}", model.as_str())
        };

        match channel.source {
            SensorSource::Sht30Temperature { bus: slot, address } => {
                let sensor = self.sht30(handle_for(slot), slot, address, label("SHT30", slot));
                Box::new(move || -> Result<f32, SensorError> {
                    sensor.borrow_mut().with(|sht| sht.temperature_c())
                })
            }
            SensorSource::Sht30Humidity { bus: slot, address } => {
                let sensor = self.sht30(handle_for(slot), slot, address, label("SHT30", slot));
                Box::new(move || -> Result<f32, SensorError> {
                    sensor.borrow_mut().with(|sht| sht.humidity())
                })
            }
            SensorSource::Ltr390Uv { bus: slot } => {
                let handle = handle_for(slot);
                let sensor = Reconnecting::shared(label("LTR390", slot), move || {
                    Ltr390::new(RefCellDevice::new(handle), Delay::new_default())
                });
                Box::new(move || -> Result<f32, SensorError> {
                    sensor.borrow_mut().with(|ltr| ltr.uv_index())
                })
            }
            SensorSource::Tsl2591Lux { bus: slot } => {
                let sensor = self.tsl2591(handle_for(slot), slot, label("TSL2591", slot));
                Box::new(move || -> Result<f32, SensorError> {
                    sensor.borrow_mut().with(|tsl| tsl.lux())
                })
            }
            SensorSource::Tsl2591Infrared { bus: slot } => {
                let sensor = self.tsl2591(handle_for(slot), slot, label("TSL2591", slot));
                Box::new(move || -> Result<f32, SensorError> {
                    sensor.borrow_mut().with(|tsl| tsl.infrared())
                })
            }
            SensorSource::Vl53l0xDistance { bus: slot } => {
                let handle = handle_for(slot);
                let sensor = Reconnecting::shared(label("VL53L0X", slot), move || {
                    Vl53l0x::new(RefCellDevice::new(handle), Delay::new_default())
                });
                Box::new(move || -> Result<f32, SensorError> {
                    sensor.borrow_mut().with(|vl| vl.distance_mm())
                })
            }
            SensorSource::Hx711Weight => {
                let sensor = hx711;
                Box::new(move || -> Result<f32, SensorError> {
                    sensor.borrow_mut().with(|hx| hx.weight(HX711_SAMPLES))
                })
            }
            SensorSource::WindPulses => detached(model, &channel.name),
        }
    }

    fn sht30(
        &mut self,
        handle: BusHandle,
        slot: BusSlot,
        address: u8,
        label: String,
    ) -> Shared<Sht30<SharedI2c, Delay>> {
        self.sht30
            .entry((slot, address))
            .or_insert_with(|| {
                Reconnecting::shared(format!("{label} @ {address:#04x}"), move || {
                    Ok(Sht30::new(
                        RefCellDevice::new(handle),
                        Delay::new_default(),
                        address,
                    ))
                })
            })
            .clone()
    }

    fn tsl2591(
        &mut self,
        handle: BusHandle,
        slot: BusSlot,
        label: String,
    ) -> Shared<Tsl2591<SharedI2c, Delay>> {
        self.tsl2591
            .entry(slot)
            .or_insert_with(|| {
                Reconnecting::shared(label, move || {
                    Tsl2591::new(RefCellDevice::new(handle), Delay::new_default())
                })
            })
            .clone()
    }
}

fn detached(model: ModelId, channel: &str) -> Box<dyn Probe> {
    let reason = format!("{channel}: model {} is not fitted on this board", model.as_str());
    Box::new(move || -> Result<f32, SensorError> { Err(SensorError::Bus(reason.clone())) })
}

fn connect_hx711(config: Hx711Config) -> Result<Hx711<InputLine, OutputLine, Ets>, SensorError> {
    let dout = PinDriver::input(unsafe { AnyInputPin::new(config.dout) }).map_err(SensorError::bus)?;
    let sck = PinDriver::output(unsafe { AnyOutputPin::new(config.sck) }).map_err(SensorError::bus)?;
    let mut hx711 = Hx711::new(dout, sck, Ets, Hx711Gain::A128)?;
    hx711.set_calibration(config.offset, config.scale);
    Ok(hx711)
}

fn connect_wind(config: WindConfig) -> Result<WindSensor<PulseLine, Ets>, SensorError> {
    // set_pull needs an IO-capable pin.
    let mut pin = PinDriver::input(unsafe { AnyIOPin::new(config.pin) }).map_err(SensorError::bus)?;
    pin.set_pull(Pull::Up).map_err(SensorError::bus)?;
    Ok(WindSensor::new(pin, Ets, config.factor, config.window_ms))
}

fn i2c_config(baudrate_hz: u32) -> I2cConfig {
    I2cConfig::new().baudrate(Hertz(baudrate_hz))
}

fn open_bus<I: I2c>(
    i2c: impl Peripheral<P = I> + 'static,
    pins: BusPins,
    baudrate_hz: u32,
) -> anyhow::Result<BusHandle> {
    let (sda, scl) = unsafe { (AnyIOPin::new(pins.sda), AnyIOPin::new(pins.scl)) };
    let driver = I2cDriver::new(i2c, sda, scl, &i2c_config(baudrate_hz))?;
    Ok(Box::leak(Box::new(RefCell::new(driver))))
}

fn scan_bus<'d, I: I2c>(
    i2c: impl Peripheral<P = I> + 'd,
    pins: BusPins,
    baudrate_hz: u32,
) -> anyhow::Result<Vec<u8>> {
    let (sda, scl) = unsafe { (AnyIOPin::new(pins.sda), AnyIOPin::new(pins.scl)) };
    let mut driver = I2cDriver::new(i2c, sda, scl, &i2c_config(baudrate_hz))?;
    let timeout = TickType::new_millis(SCAN_TIMEOUT_MS).ticks();

    Ok((0x08_u8..0x78)
        .filter(|address| driver.write(*address, &[], timeout).is_ok())
        .collect())
}

/// Scans the primary bus of every wired model, one at a time on `I2C0`.
fn scan_primary_buses(i2c0: &mut I2C0, hardware: &HardwareConfig) -> Vec<(ModelId, Vec<u8>)> {
    let mut scans = Vec::new();
    for pins in &hardware.models {
        match scan_bus(&mut *i2c0, pins.primary, hardware.i2c_baudrate_hz) {
            Ok(addresses) => {
                info!("I2C scan {}1: {addresses:02x?}", pins.model.as_str());
                scans.push((pins.model, addresses));
            }
            Err(err) => warn!("I2C scan of {}1 failed: {err:#}", pins.model.as_str()),
        }
    }
    scans
}

pub fn run() -> anyhow::Result<()> {
    esp_idf_svc::sys::link_patches();
    EspLogger::initialize_default();

    let sys_loop = EspSystemEventLoop::take()?;
    let nvs_partition = EspDefaultNvsPartition::take()?;
    let nvs_store = NvsStore {
        partition: nvs_partition.clone(),
    };

    let mut config = nvs_store.load_station_config().unwrap_or_else(|err| {
        warn!("failed to load station config from NVS: {err:#}");
        StationConfig::default()
    });
    ensure_wifi_defaults(&mut config.network);

    let Peripherals {
        modem,
        mut i2c0,
        i2c1,
        ..
    } = Peripherals::take()?;

    let scans = scan_primary_buses(&mut i2c0, &config.hardware);
    let detected = detect_model(scans.iter().map(|(model, found)| (*model, found.as_slice())));
    info!("detected model {}", detected.as_str());

    let hardware = match config.hardware.pins_for(detected) {
        Some(pins) if detected != ModelId::D => {
            match ModelHardware::bring_up(pins, i2c0, i2c1, config.hardware.i2c_baudrate_hz) {
                Ok(hardware) => Some(hardware),
                Err(err) => {
                    warn!("sensor buses unavailable ({err:#}); channels will report fallbacks");
                    None
                }
            }
        }
        _ => None,
    };

    let _wifi = connect_wifi(modem, sys_loop, nvs_partition, &config.network)
        .context("wifi startup failed")?;
    keep_radio_awake();

    if let Ok(mut ota) = EspOta::new() {
        if let Err(err) = ota.mark_running_slot_valid() {
            warn!("failed to mark running OTA slot valid: {err:?}");
        }
    }

    let watchdog = Watchdog::arm(WATCHDOG_TIMEOUT_SEC)?;

    match apply_firmware_update(&config.network, &nvs_store, &watchdog) {
        Ok(decision) if decision.requires_restart() => restart_station("new firmware staged"),
        Ok(_) => {}
        Err(err) => warn!("firmware check failed: {err:#}"),
    }

    let mut factory = ProbeFactory::new(hardware, config.hardware.wind);
    let mut groups = Vec::new();
    for group in config.active_groups(detected) {
        let probes = factory.probes_for(group.model, &group.channels);
        groups.push(GroupRuntime::new(group, probes)?);
    }

    let started = Instant::now();
    let now_ms = || u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
    let mut driver = Driver::new(
        config.driver.clone(),
        config.network.upload_base_url.clone(),
        groups,
        now_ms(),
    );

    let http_timeout_ms = config.network.http_timeout_ms;
    let mut sink = |url: &str| http_get_text(url, http_timeout_ms);
    let mut uplink = LinkMonitor::default();

    info!(
        "station running: {} group(s), cycle {}ms",
        driver.groups().len(),
        config.driver.cycle_delay_ms
    );

    loop {
        watchdog.feed();
        uplink.check();

        let report = driver.tick(now_ms(), &mut sink);
        debug!(
            "cycle done: {} upload(s), {} fallback(s), {} failed upload(s)",
            report.uploads.len(),
            report.fallbacks,
            report.upload_failures
        );

        if report.state == DriverState::Restarting {
            thread::sleep(driver.restart_grace());
            restart_station("scheduled uptime reached");
        }

        let mut remaining = driver.cycle_delay();
        while !remaining.is_zero() {
            let step = remaining.min(Duration::from_secs(1));
            watchdog.feed();
            thread::sleep(step);
            remaining -= step;
        }
    }
}

fn http_client(timeout_ms: u64) -> anyhow::Result<HttpClient<EspHttpConnection>> {
    let http_conf = HttpClientConfiguration {
        timeout: Some(Duration::from_millis(timeout_ms)),
        crt_bundle_attach: Some(esp_idf_svc::sys::esp_crt_bundle_attach),
        ..Default::default()
    };
    Ok(HttpClient::wrap(EspHttpConnection::new(&http_conf)?))
}

fn transport<E: Debug>(err: E) -> UploadError {
    UploadError::Transport(format!("{err:?}"))
}

/// One GET; the body is truncated to `MAX_HTTP_BODY` bytes.
fn http_get_text(url: &str, timeout_ms: u64) -> Result<String, UploadError> {
    let mut client = http_client(timeout_ms).map_err(|err| UploadError::Transport(format!("{err:#}")))?;
    let request = client.request(Method::Get, url, &[]).map_err(transport)?;
    let mut response = request.submit().map_err(transport)?;

    let status = response.status();
    let mut body = Vec::new();
    let mut chunk = [0_u8; 128];
    while body.len() < MAX_HTTP_BODY {
        let read = response.read(&mut chunk).map_err(transport)?;
        if read == 0 {
            break;
        }
        body.extend_from_slice(&chunk[..read]);
    }

    if !(200..300).contains(&status) {
        return Err(UploadError::Status(status));
    }
    Ok(String::from_utf8_lossy(&body).trim().to_string())
}

/// Streams the published image into the idle OTA slot. The slot is only
/// made bootable when the image differs from the last one applied.
fn apply_firmware_update(
    network: &NetworkConfig,
    nvs_store: &NvsStore,
    watchdog: &Watchdog,
) -> anyhow::Result<UpdateDecision> {
    let stored_digest = nvs_store.firmware_digest().unwrap_or_else(|err| {
        warn!("failed to read firmware digest from NVS: {err:#}");
        None
    });

    info!("checking {} for firmware updates", network.firmware_url);
    let mut client = http_client(network.http_timeout_ms)?;
    let request = client.request(Method::Get, &network.firmware_url, &[])?;
    let mut response = request.submit().map_err(|e| anyhow!("{e:?}"))?;

    let status = response.status();
    if !(200..300).contains(&status) {
        return Err(anyhow!("firmware download failed with HTTP {status}"));
    }

    let mut ota = EspOta::new().map_err(|err| anyhow!("failed to acquire OTA: {err:?}"))?;
    let mut update = ota
        .initiate_update()
        .map_err(|err| anyhow!("failed to initiate OTA update: {err:?}"))?;

    let mut digest = FirmwareDigest::new();
    let mut chunk = [0_u8; OTA_CHUNK_SIZE];
    loop {
        watchdog.feed();
        let read = response.read(&mut chunk).map_err(|e| anyhow!("{e:?}"))?;
        if read == 0 {
            break;
        }
        update
            .write(&chunk[..read])
            .map_err(|err| anyhow!("failed writing OTA data: {err:?}"))?;
        digest.update(&chunk[..read]);
    }

    let decision = decide_streamed(digest, stored_digest.as_deref());
    match &decision {
        UpdateDecision::Replace { digest, size } => {
            update
                .complete()
                .map_err(|err| anyhow!("failed finalizing OTA image: {err:?}"))?;
            nvs_store.set_firmware_digest(digest)?;
            info!("firmware replaced ({size} bytes, sha256 {digest})");
        }
        UpdateDecision::Unchanged => {
            update
                .abort()
                .map_err(|err| anyhow!("failed to abort OTA update: {err:?}"))?;
            info!("firmware is up to date");
        }
        UpdateDecision::Empty => {
            update
                .abort()
                .map_err(|err| anyhow!("failed to abort OTA update: {err:?}"))?;
            warn!("firmware fetch returned an empty body; keeping current image");
        }
    }
    Ok(decision)
}

fn has_station_credentials(network: &NetworkConfig) -> bool {
    let ssid = network.wifi_ssid.trim();
    !ssid.is_empty() && ssid != "CHANGE_ME"
}

fn ensure_wifi_defaults(network: &mut NetworkConfig) {
    if network.wifi_ssid.is_empty() {
        network.wifi_ssid = option_env!("WIFI_SSID").unwrap_or("CHANGE_ME").to_string();
    }

    if network.wifi_pass.is_empty() {
        network.wifi_pass = option_env!("WIFI_PASS").unwrap_or_default().to_string();
    }
}

/// Brings the station interface up. Failing to associate is not fatal:
/// uploads fail and are logged until `LinkMonitor` restarts the board.
fn connect_wifi(
    modem: Modem,
    sys_loop: EspSystemEventLoop,
    nvs_partition: EspDefaultNvsPartition,
    network: &NetworkConfig,
) -> anyhow::Result<EspWifi<'static>> {
    let mut esp_wifi = EspWifi::new(modem, sys_loop.clone(), Some(nvs_partition))?;
    let mut wifi = BlockingWifi::wrap(&mut esp_wifi, sys_loop)?;

    if !has_station_credentials(network) {
        warn!("wifi credentials missing; running offline");
        return Ok(esp_wifi);
    }

    let auth_method = if network.wifi_pass.is_empty() {
        AuthMethod::None
    } else {
        AuthMethod::WPAWPA2Personal
    };

    wifi.set_configuration(&Configuration::Client(ClientConfiguration {
        ssid: network
            .wifi_ssid
            .as_str()
            .try_into()
            .map_err(|_| anyhow!("wifi ssid too long"))?,
        password: network
            .wifi_pass
            .as_str()
            .try_into()
            .map_err(|_| anyhow!("wifi password too long"))?,
        auth_method,
        ..Default::default()
    }))?;

    wifi.start()?;
    info!("wifi started, connecting to `{}`", network.wifi_ssid);

    for attempt in 1..=WIFI_CONNECT_ATTEMPTS {
        info!("wifi connect attempt {attempt}/{WIFI_CONNECT_ATTEMPTS}");
        match wifi.connect().and_then(|()| wifi.wait_netif_up()) {
            Ok(()) => {
                info!("wifi connected and netif up on attempt {attempt}");
                return Ok(esp_wifi);
            }
            Err(err) => warn!("wifi connect failed on attempt {attempt}: {err:#}"),
        }

        if attempt < WIFI_CONNECT_ATTEMPTS {
            let _ = wifi.disconnect();
            thread::sleep(Duration::from_millis(WIFI_RETRY_DELAY_MS));
        }
    }

    warn!("all {WIFI_CONNECT_ATTEMPTS} wifi connect attempts failed; continuing offline");
    Ok(esp_wifi)
}

struct NvsStore {
    partition: EspDefaultNvsPartition,
}

impl NvsStore {
    fn open(&self) -> anyhow::Result<EspNvs<esp_idf_svc::nvs::NvsDefault>> {
        Ok(EspNvs::new(self.partition.clone(), NVS_NAMESPACE, true)?)
    }

    fn load_station_config(&self) -> anyhow::Result<StationConfig> {
        let nvs = self.open()?;
        let mut buffer = vec![0_u8; NVS_CONFIG_BUFFER];

        match nvs.get_str(NVS_STATION_KEY, &mut buffer)? {
            Some(value) => Ok(StationConfig::from_json(value)?),
            None => Ok(StationConfig::default()),
        }
    }

    fn firmware_digest(&self) -> anyhow::Result<Option<String>> {
        let nvs = self.open()?;
        let mut buffer = [0_u8; 80];
        Ok(nvs
            .get_str(NVS_FIRMWARE_KEY, &mut buffer)?
            .map(str::to_string))
    }

    fn set_firmware_digest(&self, digest: &str) -> anyhow::Result<()> {
        let mut nvs = self.open()?;
        nvs.set_str(NVS_FIRMWARE_KEY, digest)?;
        Ok(())
    }
}

/// Task watchdog for the polling loop. A slow sensor or a stuck HTTP call
/// that outlives the timeout panics the task and reboots the station.
struct Watchdog;

impl Watchdog {
    fn arm(timeout_sec: u32) -> anyhow::Result<Self> {
        let config = esp_idf_svc::sys::esp_task_wdt_config_t {
            timeout_ms: timeout_sec.saturating_mul(1000),
            idle_core_mask: 0,
            trigger_panic: true,
        };
        // ESP_ERR_INVALID_STATE means the bootloader already armed it.
        let rc = unsafe { esp_idf_svc::sys::esp_task_wdt_init(&config) };
        if rc != esp_idf_svc::sys::ESP_OK && rc != esp_idf_svc::sys::ESP_ERR_INVALID_STATE {
            return Err(anyhow!("station watchdog init failed (esp_err_t={rc})"));
        }

        let rc = unsafe { esp_idf_svc::sys::esp_task_wdt_add(core::ptr::null_mut()) };
        if rc != esp_idf_svc::sys::ESP_OK && rc != esp_idf_svc::sys::ESP_ERR_INVALID_STATE {
            return Err(anyhow!("polling task not watched (esp_err_t={rc})"));
        }

        info!("watchdog armed: {timeout_sec}s per polling cycle");
        Ok(Self)
    }

    fn feed(&self) {
        let _ = unsafe { esp_idf_svc::sys::esp_task_wdt_reset() };
    }
}

/// Uploads are sparse, so modem sleep only adds latency to each GET.
fn keep_radio_awake() {
    let rc = unsafe { esp_idf_svc::sys::esp_wifi_set_ps(0) };
    if rc != esp_idf_svc::sys::ESP_OK {
        warn!("radio power save left on (esp_err_t={rc}); uploads may lag");
    }
}

/// Reboots the station when the access point has been gone longer than
/// `WIFI_RESTART_GRACE_MS`. A fresh boot re-runs association from scratch.
#[derive(Default)]
struct LinkMonitor {
    offline_since: Option<Instant>,
}

impl LinkMonitor {
    fn check(&mut self) {
        let mut ap_info = esp_idf_svc::sys::wifi_ap_record_t::default();
        let associated =
            unsafe { esp_idf_svc::sys::esp_wifi_sta_get_ap_info(&mut ap_info) } == esp_idf_svc::sys::ESP_OK;
        if associated {
            if self.offline_since.take().is_some() {
                info!("uplink restored");
            }
            return;
        }

        let since = *self.offline_since.get_or_insert_with(|| {
            warn!("uplink lost; uploads will fail until it returns");
            Instant::now()
        });
        if since.elapsed() >= Duration::from_millis(WIFI_RESTART_GRACE_MS) {
            restart_station(&format!(
                "no uplink for {}s",
                WIFI_RESTART_GRACE_MS / 1000
            ));
        }
    }
}

fn restart_station(reason: &str) {
    warn!("restarting station: {reason}");
    thread::sleep(Duration::from_millis(100));
    unsafe { esp_idf_svc::sys::esp_restart() };
}
