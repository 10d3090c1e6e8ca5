use std::path::PathBuf;
use std::sync::mpsc::{self, Receiver};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use tracing::{debug, info, warn};

use crate::config::{AppConfig, HANDSHAKE, Timing};
use crate::device_config::{CommMode, DeviceConfig, ParkingType};
use crate::error::TransportError;
use crate::framing::FrameReassembler;
use crate::parser::parse_line;
use crate::protocol::Command;
use crate::sequencer::{Link, Poller, Sequence};
use crate::state::{Applied, ConnectionState, DeviceState, View, lock};
use crate::telemetry::{LogEntry, SensorTelemetry};
use crate::transport::{Connector, LinkEvent, Transport};

/// Stand-in link used while nothing is connected; every write fails.
struct Offline;

impl Transport for Offline {
    fn write(&self, _bytes: &[u8]) -> Result<(), TransportError> {
        Err(TransportError::NotConnected)
    }

    fn close(&self) {}
}

struct Inner {
    state: Arc<Mutex<DeviceState>>,
    timing: Timing,
    settings_path: Option<PathBuf>,
    link: Mutex<Option<Link>>,
    poller: Mutex<Option<Poller>>,
}

/// One dashboard session: owns the state the presentation layer reads and
/// turns its intents into commands.
#[derive(Clone)]
pub struct Session {
    inner: Arc<Inner>,
}

impl Session {
    pub fn new(config: &AppConfig) -> Self {
        let mut state = DeviceState::with_log_capacity(config.log_capacity);
        if let Some(path) = &config.settings_path {
            state.config = DeviceConfig::load_or_default(path);
        }

        Self {
            inner: Arc::new(Inner {
                state: Arc::new(Mutex::new(state)),
                timing: config.timing,
                settings_path: config.settings_path.clone(),
                link: Mutex::new(None),
                poller: Mutex::new(None),
            }),
        }
    }

    pub fn telemetry(&self) -> SensorTelemetry {
        lock(&self.inner.state).telemetry.clone()
    }

    pub fn config(&self) -> DeviceConfig {
        lock(&self.inner.state).config.clone()
    }

    pub fn connection(&self) -> ConnectionState {
        lock(&self.inner.state).connection
    }

    pub fn view(&self) -> View {
        lock(&self.inner.state).view
    }

    pub fn logs(&self) -> Vec<LogEntry> {
        lock(&self.inner.state).log.snapshot()
    }

    pub fn clear_logs(&self) {
        lock(&self.inner.state).log.clear();
    }

    /// Find a device, open the link, handshake and start talking to it.
    pub fn connect(&self, connector: &mut dyn Connector) -> Result<(), TransportError> {
        {
            let mut state = lock(&self.inner.state);
            if state.connection != ConnectionState::Disconnected {
                debug!(state = ?state.connection, "connect refused");
                return Err(TransportError::Busy(format!("{:?}", state.connection)));
            }
            state.connection = ConnectionState::Searching;
        }

        let name = match connector.discover() {
            Ok(name) => name,
            Err(e) => return Err(self.connect_failed(e)),
        };
        lock(&self.inner.state).connection = ConnectionState::Connecting;

        let (tx, rx) = mpsc::channel();
        let transport = match connector.open(tx) {
            Ok(transport) => transport,
            Err(e) => return Err(self.connect_failed(e)),
        };
        let link = Link::new(transport, Arc::clone(&self.inner.state));
        if let Err(e) = link.write_raw(HANDSHAKE.as_bytes()) {
            link.close();
            return Err(self.connect_failed(e));
        }

        {
            let mut state = lock(&self.inner.state);
            state.connection = ConnectionState::Connected;
            state.log.push_received(format!("Handshake OK: {name}"));
        }
        info!(device = %name, "connected");

        *lock(&self.inner.link) = Some(link.clone());
        *lock(&self.inner.poller) = Some(Poller::start(link.clone(), self.inner.timing));

        let session = self.clone();
        thread::spawn(move || session.pump(rx));

        Sequence::on_connect(&self.inner.timing).spawn(link);
        self.check_nb_query();
        Ok(())
    }

    fn connect_failed(&self, e: TransportError) -> TransportError {
        warn!(error = %e, "connection failed");
        let mut state = lock(&self.inner.state);
        state.connection = ConnectionState::Disconnected;
        state.log.push_received(format!("Connection failed: {e}"));
        e
    }

    /// Ask the transport to close. Cleanup follows its disconnect notification.
    pub fn disconnect(&self) {
        let link = lock(&self.inner.link).clone();
        match link {
            Some(link) => link.close(),
            None => debug!("disconnect ignored, not connected"),
        }
    }

    /// Drain link events until the link goes away.
    fn pump(&self, events: Receiver<LinkEvent>) {
        let mut reassembler = FrameReassembler::new();
        for event in events.iter() {
            match event {
                LinkEvent::Data(bytes) => {
                    for line in reassembler.feed(&bytes) {
                        self.handle_line(&line);
                    }
                }
                LinkEvent::Disconnected => break,
            }
        }
        reassembler.reset();
        self.handle_disconnect();
    }

    /// Log an inbound line and merge it if it decodes.
    pub fn handle_line(&self, line: &str) -> Option<Applied> {
        let mut state = lock(&self.inner.state);
        state.log.push_received(line);
        match parse_line(line) {
            Some(record) => Some(state.apply(record)),
            None => {
                debug!(line, "line not decoded");
                None
            }
        }
    }

    /// Tear down after the link dropped. Repeated notifications are ignored.
    pub fn handle_disconnect(&self) {
        // Joined outside the state lock, the poller may be mid-send
        let poller = lock(&self.inner.poller).take();
        drop(poller);
        lock(&self.inner.link).take();

        let mut state = lock(&self.inner.state);
        if state.connection == ConnectionState::Disconnected {
            return;
        }
        state.reset_after_disconnect();
        state.log.push_received("Link disconnected");
        info!("disconnected");
    }

    fn link(&self) -> Link {
        lock(&self.inner.link)
            .clone()
            .unwrap_or_else(|| Link::new(Arc::new(Offline), Arc::clone(&self.inner.state)))
    }

    /// Send one command now. Returns whether the write went out.
    pub fn send(&self, command: Command) -> bool {
        self.link().send(&command)
    }

    /// Console input, sent as typed.
    pub fn send_raw(&self, text: &str) -> bool {
        self.send(Command::Raw(text.to_string()))
    }

    pub fn send_hex(&self, text: &str) -> Result<(), TransportError> {
        self.link().send_hex(text)
    }

    pub fn refresh(&self) -> bool {
        self.send(Command::RadarStatus)
    }

    pub fn calibrate(&self) -> bool {
        self.send(Command::Calibrate)
    }

    pub fn reboot(&self) -> bool {
        self.send(Command::Reboot)
    }

    pub fn toggle_radar(&self) -> bool {
        let enabled = {
            let mut state = lock(&self.inner.state);
            state.config.radar_enabled = !state.config.radar_enabled;
            state.config.radar_enabled
        };
        self.send(Command::RadarEnable(enabled))
    }

    pub fn set_park_type(&self, parking_type: ParkingType) -> bool {
        lock(&self.inner.state).config.parking_type = parking_type;
        self.send(Command::ParkType(parking_type))
    }

    pub fn apply_thresholds(&self) -> JoinHandle<()> {
        let config = self.config();
        Sequence::apply_thresholds(&config, &self.inner.timing).spawn(self.link())
    }

    /// Push the active uplink's settings to the device and save them locally.
    pub fn save_config(&self) -> JoinHandle<()> {
        let config = self.config();
        if let Some(path) = &self.inner.settings_path
            && let Err(e) = config.save_to_file(path)
        {
            warn!(path = %path.display(), error = %e, "failed to save device config");
        }
        Sequence::save_config(&config, &self.inner.timing).spawn(self.link())
    }

    /// Local edit; nothing is sent until the config is saved.
    pub fn edit_config(&self, edit: impl FnOnce(&mut DeviceConfig)) {
        edit(&mut lock(&self.inner.state).config);
        self.check_nb_query();
    }

    pub fn set_config_field(&self, field: &str, value: &str) -> Result<(), String> {
        lock(&self.inner.state).config.set_field(field, value)?;
        self.check_nb_query();
        Ok(())
    }

    pub fn set_view(&self, view: View) {
        lock(&self.inner.state).view = view;
        self.check_nb_query();
    }

    /// Fetch NB-IoT settings once per visit to the settings view in NB-IoT mode.
    fn check_nb_query(&self) {
        {
            let mut state = lock(&self.inner.state);
            if state.view != View::Settings {
                state.nb_queried = None;
                return;
            }
            if state.connection != ConnectionState::Connected
                || state.config.comm_mode != CommMode::NbIot
            {
                return;
            }
            let key = (state.view, state.config.comm_mode);
            if state.nb_queried == Some(key) {
                return;
            }
            state.nb_queried = Some(key);
        }
        Sequence::nb_config_query(&self.inner.timing).spawn(self.link());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::telemetry::{Direction, EventType};
    use crate::transport::mock::{MockConnector, MockTransport};
    use std::time::{Duration, Instant};

    fn quiet_timing() -> Timing {
        Timing {
            init_gap_ms: 20,
            query_gap_ms: 40,
            threshold_gap_ms: 20,
            config_gap_ms: 40,
            poll_interval_ms: 60_000,
        }
    }

    fn session(timing: Timing) -> Session {
        Session::new(&AppConfig {
            timing,
            ..AppConfig::default()
        })
    }

    fn wait_until(what: &str, mut cond: impl FnMut() -> bool) {
        let deadline = Instant::now() + Duration::from_secs(3);
        while !cond() {
            assert!(Instant::now() < deadline, "timed out waiting for {what}");
            thread::sleep(Duration::from_millis(5));
        }
    }

    fn connected(timing: Timing) -> (Session, Arc<MockTransport>) {
        let s = session(timing);
        let (mut connector, transport) = MockConnector::new();
        s.connect(&mut connector).unwrap();
        // handshake plus the three connect commands
        wait_until("connect sequence", || transport.written().len() == 4);
        (s, transport)
    }

    #[test]
    fn connect_handshakes_then_initialises() {
        let (s, transport) = connected(quiet_timing());

        assert_eq!(s.connection(), ConnectionState::Connected);
        assert_eq!(
            transport.written(),
            vec![
                "SWIOTT",
                "AT+SWRDINIT\r\n",
                "AT+SWQUERY?\r\n",
                "AT+SWRDSTATUS?\r\n"
            ]
        );
        let logs = s.logs();
        assert_eq!(logs[0].content, "Handshake OK: 3A-PARK-01");
        assert_eq!(logs[0].direction, Direction::Received);
    }

    #[test]
    fn failed_discovery_returns_to_disconnected() {
        let s = session(quiet_timing());
        let (mut connector, transport) = MockConnector::new();
        connector.fail_discover = true;

        assert!(s.connect(&mut connector).is_err());
        assert_eq!(s.connection(), ConnectionState::Disconnected);
        assert!(transport.written().is_empty());
        assert!(s.logs()[0].content.starts_with("Connection failed"));
    }

    #[test]
    fn inbound_chunks_update_telemetry() {
        let (s, transport) = connected(quiet_timing());

        transport.inject(b"+MRSTATUS:1,0,10,20,30,100,-70,50,2");
        transport.inject(b"00,1,0+SWRSSI:-60\r\n+SWQUERY:1A558A0702640038FF10002C01\r\n");

        wait_until("telemetry", || s.telemetry().distance == 300);
        let t = s.telemetry();
        assert!(t.is_parked);
        assert_eq!(t.event_type, EventType::Entry);
        assert_eq!(t.err_code, 0);
        assert_eq!(t.rssi, 0xFF38);
        assert_eq!((t.mag_x, t.mag_y, t.mag_z), (10, 20, 30));

        let received: Vec<String> = s
            .logs()
            .into_iter()
            .filter(|e| e.direction == Direction::Received)
            .map(|e| e.content)
            .collect();
        assert_eq!(
            received[1..],
            [
                "+MRSTATUS:1,0,10,20,30,100,-70,50,200,1,0",
                "+SWRSSI:-60",
                "+SWQUERY:1A558A0702640038FF10002C01",
            ]
        );
    }

    #[test]
    fn undecodable_lines_are_logged_only() {
        let (s, transport) = connected(quiet_timing());
        transport.inject(b"ERROR\r\n+SWQUERY:12\r\n");

        wait_until("log", || s.logs().iter().any(|e| e.content == "+SWQUERY:12"));
        assert!(s.logs().iter().any(|e| e.content == "ERROR"));
        assert_eq!(s.telemetry(), SensorTelemetry::default());
    }

    #[test]
    fn disconnect_resets_session() {
        let (s, transport) = connected(quiet_timing());
        transport.inject(b"+MRSTATUS:1,0,10,20,30,100,-70,50,200,1,0\r\n");
        wait_until("parked", || s.telemetry().is_parked);

        s.disconnect();
        wait_until("disconnect", || s.connection() == ConnectionState::Disconnected);

        assert_eq!(s.telemetry(), SensorTelemetry::default());
        assert_eq!(s.logs().last().unwrap().content, "Link disconnected");

        assert!(!s.refresh());
        let logs = s.logs();
        let tail: Vec<&str> = logs[logs.len() - 2..].iter().map(|e| e.content.as_str()).collect();
        assert_eq!(tail, vec!["AT+SWRDSTATUS?", "Err: not connected"]);
    }

    #[test]
    fn polling_stops_after_disconnect() {
        let timing = Timing {
            poll_interval_ms: 100,
            ..quiet_timing()
        };
        let (s, transport) = connected(timing);
        wait_until("a poll", || transport.written().len() >= 6);
        assert_eq!(transport.written()[4], "AT+SWQUERY?\r\n");

        transport.drop_link();
        wait_until("disconnect", || s.connection() == ConnectionState::Disconnected);
        let count = transport.written().len();

        thread::sleep(Duration::from_millis(300));
        assert_eq!(transport.written().len(), count);
    }

    #[test]
    fn reconnect_starts_clean() {
        let (s, transport) = connected(quiet_timing());
        transport.inject(b"+SWRSSI:-5");
        transport.drop_link();
        wait_until("disconnect", || s.connection() == ConnectionState::Disconnected);

        let (mut connector, transport) = MockConnector::new();
        s.connect(&mut connector).unwrap();
        wait_until("connect sequence", || transport.written().len() == 4);

        // The partial line from the old link must not prefix this one
        transport.inject(b"0\r\n");
        wait_until("line", || s.logs().iter().any(|e| e.content == "0"));
        assert_eq!(s.telemetry().rssi, 0);
    }

    #[test]
    fn polling_restarts_on_new_link() {
        let timing = Timing {
            poll_interval_ms: 100,
            ..quiet_timing()
        };
        let (s, first) = connected(timing);
        first.drop_link();
        wait_until("disconnect", || s.connection() == ConnectionState::Disconnected);
        let first_count = first.written().len();

        let (mut connector, second) = MockConnector::new();
        s.connect(&mut connector).unwrap();
        wait_until("poll on new link", || second.written().len() >= 6);

        assert_eq!(second.written()[4..6], ["AT+SWQUERY?\r\n", "AT+SWRDSTATUS?\r\n"]);
        assert_eq!(first.written().len(), first_count);
    }

    #[test]
    fn connect_while_connected_is_refused() {
        let (s, _transport) = connected(quiet_timing());
        let (mut connector, other) = MockConnector::new();

        let err = s.connect(&mut connector).unwrap_err();
        assert!(matches!(err, TransportError::Busy(_)));
        assert_eq!(s.connection(), ConnectionState::Connected);
        assert!(other.written().is_empty());
    }

    #[test]
    fn nb_settings_are_queried_once_per_visit() {
        let (s, transport) = connected(quiet_timing());
        s.edit_config(|c| c.comm_mode = CommMode::NbIot);

        s.set_view(View::Settings);
        wait_until("nb query", || transport.written().len() == 6);
        assert_eq!(transport.written()[4..], ["AT+NBAPN?\r\n", "AT+NBMQTT?\r\n"]);

        s.set_view(View::Settings);
        s.edit_config(|c| c.apn = "draft".into());
        thread::sleep(Duration::from_millis(100));
        assert_eq!(transport.written().len(), 6);

        s.set_view(View::Data);
        s.set_view(View::Settings);
        wait_until("second nb query", || transport.written().len() == 8);
    }

    #[test]
    fn lorawan_settings_view_sends_nothing() {
        let (s, transport) = connected(quiet_timing());
        s.set_view(View::Settings);
        thread::sleep(Duration::from_millis(100));
        assert_eq!(transport.written().len(), 4);
    }

    #[test]
    fn nb_replies_update_config() {
        let (s, transport) = connected(quiet_timing());
        transport.inject(b"+NBAPN:cmnet\r\n+NBMQTT:host,1883,user,pass,1,120\r\n");

        wait_until("mqtt", || s.config().mqtt_host == "host");
        let c = s.config();
        assert_eq!(c.apn, "cmnet");
        assert_eq!(c.mqtt_clean, 1);
        assert_eq!(c.mqtt_keep_alive, 120);
    }

    #[test]
    fn nb_save_emits_two_spaced_commands() {
        let timing = quiet_timing();
        let (s, transport) = connected(timing);
        s.edit_config(|c| {
            c.comm_mode = CommMode::NbIot;
            c.apn = "cmnet".into();
            c.mqtt_host = "10.0.0.2".into();
        });

        s.save_config().join().unwrap();

        let writes = transport.timed();
        let sent = &writes[4..];
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[0].1, "AT+NBAPN=cmnet\r\n");
        assert_eq!(sent[1].1, "AT+NBMQTT=10.0.0.2,1883,,,0,120\r\n");
        assert!(sent[1].0 - sent[0].0 >= timing.config_gap());
    }

    #[test]
    fn save_writes_settings_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        let s = Session::new(&AppConfig {
            timing: quiet_timing(),
            settings_path: Some(path.clone()),
            ..AppConfig::default()
        });
        s.set_config_field("region", "EU868").unwrap();

        s.save_config().join().unwrap();

        let saved = DeviceConfig::load_from_file(&path).unwrap();
        assert_eq!(saved.region, "EU868");
        let reopened = Session::new(&AppConfig {
            settings_path: Some(path),
            ..AppConfig::default()
        });
        assert_eq!(reopened.config().region, "EU868");
    }

    #[test]
    fn single_command_intents() {
        let (s, transport) = connected(quiet_timing());

        assert!(s.toggle_radar());
        assert!(!s.config().radar_enabled);
        assert!(s.set_park_type(ParkingType::Vertical));
        assert!(s.calibrate());
        assert!(s.reboot());
        assert!(s.send_raw("AT+CSQ"));

        assert_eq!(
            transport.written()[4..],
            [
                "AT+SWRDENABLE=0\r\n",
                "AT+SWRDPARKTYPE=1\r\n",
                "AT+SWRDCALI\r\n",
                "AT+SWREBOOT\r\n",
                "AT+CSQ\r\n",
            ]
        );
        assert_eq!(s.config().parking_type, ParkingType::Vertical);
    }

    #[test]
    fn thresholds_use_current_config() {
        let (s, transport) = connected(quiet_timing());
        s.set_config_field("target_threshold", "200").unwrap();
        s.set_config_field("cover_threshold", "3000").unwrap();

        s.apply_thresholds().join().unwrap();

        assert_eq!(
            transport.written()[4..],
            ["AT+SWRDTARTH=200\r\n", "AT+SWRDAVGTH=3000\r\n"]
        );
        assert_eq!(s.logs().last().unwrap().content, "Thresholds update requested.");
    }

    #[test]
    fn clear_logs_empties_history() {
        let (s, _transport) = connected(quiet_timing());
        assert!(!s.logs().is_empty());
        s.clear_logs();
        assert!(s.logs().is_empty());
    }
}
