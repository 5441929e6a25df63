use std::sync::{Mutex, MutexGuard, PoisonError};

use systemair_save::{Catalog, Client, RawSnapshot, RegisterDescriptor};
use tracing::{debug, warn};

use crate::Result;

mod gateway;
mod value;

pub use gateway::Gateway;
pub use value::{decode, encode, RegisterValue};

/// Keeps track of which registers of a unit are of interest, reads them all in one request per poll and translates
/// between raw words and engineering values.
///
/// Decoding never touches the network: it only looks at the words fetched by the last successful [`poll`].
///
/// [`poll`]: Coordinator::poll
#[derive(Debug)]
pub struct Coordinator<G = Client> {
    catalog: Catalog,
    gateway: G,
    state: Mutex<State>,
    // Held for the whole of a poll so snapshots are replaced one at a time.
    in_flight: tokio::sync::Mutex<()>,
}

#[derive(Debug, Default)]
struct State {
    poll_set: Vec<RegisterDescriptor>,
    snapshot: RawSnapshot,
    available: bool,
}

impl State {
    fn add(&mut self, register: RegisterDescriptor) -> bool {
        if self.poll_set.iter().any(|r| r.key == register.key) {
            return false;
        }
        self.poll_set.push(register);
        true
    }
}

impl<G: Gateway> Coordinator<G> {
    pub fn new(catalog: Catalog, gateway: G) -> Self {
        Self {
            catalog,
            gateway,
            state: Mutex::default(),
            in_flight: tokio::sync::Mutex::new(()),
        }
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    pub fn gateway(&self) -> &G {
        &self.gateway
    }

    /// Adds `register` to the registers read by every poll.
    ///
    /// The high word of a composed register is added along with it. If its address is not in the catalog, only the
    /// low word is polled and the register will decode to 0.
    pub fn register_interest(&self, register: &RegisterDescriptor) {
        let mut state = self.state();
        if state.add(*register) {
            debug!(key = register.key, address = register.address, "Registered interest");
        }

        if let Some(high) = register.composed_high_address {
            match self.catalog.by_address(high) {
                Some(partner) => {
                    state.add(*partner);
                }
                None => debug!(key = register.key, high, "High word is not in the catalog"),
            }
        }
    }

    /// Registers currently read by each poll, in the order interest was registered.
    pub fn poll_set(&self) -> Vec<RegisterDescriptor> {
        self.state().poll_set.clone()
    }

    /// Decodes `register` from the last snapshot. Registers not polled yet decode to 0, and are polled from now on.
    pub fn decode(&self, register: &RegisterDescriptor) -> f64 {
        self.register_interest(register);
        decode(register, &self.state().snapshot)
    }

    pub fn value(&self, register: &RegisterDescriptor) -> RegisterValue {
        let n = self.decode(register);
        if register.is_boolean {
            RegisterValue::Boolean(n != 0.0)
        } else {
            RegisterValue::Numeric(n)
        }
    }

    /// Encodes `value` for `register` and writes it to the unit. Invalid values are rejected before anything is sent.
    pub async fn encode_and_write(
        &self,
        register: &RegisterDescriptor,
        value: RegisterValue,
    ) -> Result<()> {
        let raw = encode(register, value)?;
        debug!(key = register.key, %value, raw, "Writing");
        self.gateway.write(register.address, raw).await?;
        Ok(())
    }

    /// Writes `value` and then polls so the new value can be read back.
    ///
    /// A failed refresh is logged but does not fail the write.
    pub async fn write_and_refresh(
        &self,
        register: &RegisterDescriptor,
        value: RegisterValue,
    ) -> Result<()> {
        self.register_interest(register);
        self.encode_and_write(register, value).await?;

        if let Err(error) = self.poll().await {
            warn!(key = register.key, %error, "Refresh after write failed");
        }
        Ok(())
    }

    /// Reads every register in the poll set in one request and replaces the snapshot with the result.
    ///
    /// On failure the previous snapshot is kept but the coordinator is marked unavailable. Calls made while a poll is
    /// in flight wait for it to finish and then poll again.
    pub async fn poll(&self) -> Result<()> {
        let _in_flight = self.in_flight.lock().await;

        let addresses: Vec<u16> = self.state().poll_set.iter().map(|r| r.address).collect();
        match self.gateway.read_batch(&addresses).await {
            Ok(snapshot) => {
                debug!(requested = addresses.len(), received = snapshot.len(), "Polled");
                let mut state = self.state();
                state.snapshot = snapshot;
                state.available = true;
                Ok(())
            }
            Err(error) => {
                self.state().available = false;
                Err(error.into())
            }
        }
    }

    /// Whether the last poll succeeded. False until the first poll completes.
    pub fn is_available(&self) -> bool {
        self.state().available
    }

    pub fn snapshot(&self) -> RawSnapshot {
        self.state().snapshot.clone()
    }

    fn state(&self) -> MutexGuard<'_, State> {
        // State is only ever replaced wholesale, so it is consistent even if a holder panicked.
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Error;
    use async_trait::async_trait;
    use pretty_assertions::assert_eq;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use systemair_save::wire_address;

    /// Answers reads from an in-memory register map which writes are echoed into.
    #[derive(Default)]
    struct FakeGateway {
        words: Mutex<RawSnapshot>,
        reads: Mutex<Vec<Vec<u16>>>,
        writes: Mutex<Vec<(u16, i64)>>,
        read_failures: Mutex<VecDeque<systemair_save::Error>>,
        write_failures: Mutex<VecDeque<systemair_save::Error>>,
        in_flight: AtomicUsize,
        max_in_flight: AtomicUsize,
    }

    impl FakeGateway {
        fn with_words(words: &[(u16, i64)]) -> Self {
            Self {
                words: Mutex::new(words.iter().copied().collect()),
                ..Default::default()
            }
        }

        fn fail_next_read(&self, error: systemair_save::Error) {
            self.read_failures.lock().unwrap().push_back(error);
        }

        fn fail_next_write(&self, error: systemair_save::Error) {
            self.write_failures.lock().unwrap().push_back(error);
        }

        fn reads(&self) -> Vec<Vec<u16>> {
            self.reads.lock().unwrap().clone()
        }

        fn writes(&self) -> Vec<(u16, i64)> {
            self.writes.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Gateway for FakeGateway {
        async fn read_batch(&self, addresses: &[u16]) -> systemair_save::Result<RawSnapshot> {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(10)).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);

            self.reads.lock().unwrap().push(addresses.to_vec());
            if let Some(error) = self.read_failures.lock().unwrap().pop_front() {
                return Err(error);
            }

            let words = self.words.lock().unwrap();
            Ok(addresses
                .iter()
                .map(|&address| wire_address(address))
                .filter_map(|wire| words.get(wire).map(|value| (wire, value)))
                .collect())
        }

        async fn write(&self, address: u16, value: i64) -> systemair_save::Result<()> {
            if let Some(error) = self.write_failures.lock().unwrap().pop_front() {
                return Err(error);
            }
            self.writes.lock().unwrap().push((address, value));
            self.words.lock().unwrap().insert(wire_address(address), value);
            Ok(())
        }
    }

    // words are keyed by wire address
    fn coordinator(words: &[(u16, i64)]) -> Coordinator<FakeGateway> {
        Coordinator::new(Catalog::systemair(), FakeGateway::with_words(words))
    }

    fn keys(registers: &[RegisterDescriptor]) -> Vec<&'static str> {
        registers.iter().map(|r| r.key).collect()
    }

    #[test]
    fn interest_is_registered_once() {
        let c = coordinator(&[]);
        let setpoint = *c.catalog().lookup("REG_TC_SP");
        c.register_interest(&setpoint);
        c.register_interest(&setpoint);
        assert_eq!(keys(&c.poll_set()), ["REG_TC_SP"]);
    }

    #[test]
    fn composed_registers_bring_their_high_word() {
        let c = coordinator(&[]);
        let filter = *c.catalog().lookup("REG_FILTER_REMAINING_TIME_L");
        c.register_interest(&filter);
        assert_eq!(
            keys(&c.poll_set()),
            ["REG_FILTER_REMAINING_TIME_L", "REG_FILTER_REMAINING_TIME_H"]
        );
    }

    #[test]
    fn unresolvable_high_words_are_skipped() {
        let c = coordinator(&[]);
        let orphan = RegisterDescriptor::input(40000, "REG_ORPHAN_L", "no partner").high_word(40001);
        c.register_interest(&orphan);
        assert_eq!(keys(&c.poll_set()), ["REG_ORPHAN_L"]);
    }

    #[test]
    fn decoding_registers_interest() {
        let c = coordinator(&[]);
        let oat = *c.catalog().lookup("REG_SENSOR_OAT");
        assert_eq!(c.decode(&oat), 0.0);
        assert_eq!(keys(&c.poll_set()), ["REG_SENSOR_OAT"]);
    }

    #[tokio::test]
    async fn poll_reads_the_whole_set_in_one_request() {
        let c = coordinator(&[(2000, 215), (12101, 65486), (7004, 100), (7005, 2)]);
        for key in ["REG_TC_SP", "REG_SENSOR_OAT", "REG_FILTER_REMAINING_TIME_L"] {
            c.register_interest(c.catalog().lookup(key));
        }
        assert!(!c.is_available());

        c.poll().await.unwrap();

        assert_eq!(c.gateway().reads(), [vec![2001, 12102, 7005, 7006]]);
        assert!(c.is_available());
        let catalog = c.catalog();
        assert_eq!(c.decode(catalog.lookup("REG_TC_SP")), 21.5);
        assert_eq!(c.decode(catalog.lookup("REG_SENSOR_OAT")), -5.0);
        assert_eq!(
            c.decode(catalog.lookup("REG_FILTER_REMAINING_TIME_L")),
            (100 + (2 << 16)) as f64
        );
    }

    #[tokio::test]
    async fn poll_replaces_the_snapshot_wholesale() {
        let c = coordinator(&[(2000, 215)]);
        let setpoint = *c.catalog().lookup("REG_TC_SP");
        c.register_interest(&setpoint);
        c.poll().await.unwrap();
        assert_eq!(c.snapshot().len(), 1);

        *c.gateway().words.lock().unwrap() = RawSnapshot::default();
        c.poll().await.unwrap();
        assert!(c.snapshot().is_empty());
        assert_eq!(c.decode(&setpoint), 0.0);
    }

    #[tokio::test]
    async fn failed_poll_keeps_snapshot_and_marks_unavailable() {
        let c = coordinator(&[(2000, 215)]);
        let setpoint = *c.catalog().lookup("REG_TC_SP");
        c.register_interest(&setpoint);
        c.poll().await.unwrap();

        c.gateway()
            .fail_next_read(systemair_save::Error::Disconnected { attempts: 2 });
        let error = c.poll().await.unwrap_err();
        assert!(error.is_communication());
        assert!(!c.is_available());
        assert_eq!(c.decode(&setpoint), 21.5);

        c.poll().await.unwrap();
        assert!(c.is_available());
    }

    #[tokio::test]
    async fn structural_poll_errors_are_not_communication_errors() {
        let c = coordinator(&[]);
        c.gateway()
            .fail_next_read(systemair_save::Error::UnexpectedResponse("OK".into()));
        let error = c.poll().await.unwrap_err();
        assert!(matches!(
            error,
            Error::Gateway(systemair_save::Error::UnexpectedResponse(_))
        ));
        assert!(!error.is_communication());
    }

    #[tokio::test]
    async fn polls_are_single_flight() {
        let c = coordinator(&[(2000, 215)]);
        c.register_interest(c.catalog().lookup("REG_TC_SP"));

        let (a, b, d) = tokio::join!(c.poll(), c.poll(), c.poll());
        a.unwrap();
        b.unwrap();
        d.unwrap();

        assert_eq!(c.gateway().reads().len(), 3);
        assert_eq!(c.gateway().max_in_flight.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn writes_are_encoded_for_the_registers_own_address() {
        let c = coordinator(&[]);
        let catalog = c.catalog();
        c.encode_and_write(catalog.lookup("REG_TC_SP"), 21.5.into())
            .await
            .unwrap();
        c.encode_and_write(catalog.lookup("REG_ECO_MODE_ON_OFF"), true.into())
            .await
            .unwrap();
        assert_eq!(c.gateway().writes(), [(2001, 215), (2505, 1)]);
        // plain writes do not poll
        assert!(c.gateway().reads().is_empty());
    }

    #[tokio::test]
    async fn invalid_values_are_never_sent() {
        let c = coordinator(&[]);
        let catalog = c.catalog();
        assert!(matches!(
            c.encode_and_write(catalog.lookup("REG_ECO_MODE_ON_OFF"), 1.0.into())
                .await,
            Err(Error::InvalidBooleanValue)
        ));
        assert!(matches!(
            c.write_and_refresh(catalog.lookup("REG_TC_SP"), false.into())
                .await,
            Err(Error::InvalidNumericValue(_))
        ));
        assert!(c.gateway().writes().is_empty());
        assert!(c.gateway().reads().is_empty());
    }

    #[tokio::test]
    async fn written_values_read_back_clamped() {
        let c = coordinator(&[]);
        let setpoint = *c.catalog().lookup("REG_TC_SP");
        let away = *c.catalog().lookup("REG_USERMODE_AWAY_TIME");

        for (register, written, expected) in [
            (setpoint, 21.5, 21.5),
            (setpoint, 35.0, 30.0),
            (setpoint, 5.0, 12.0),
            (away, 1000.0, 72.0),
            (away, 0.0, 1.0),
        ] {
            c.write_and_refresh(&register, written.into()).await.unwrap();
            assert_eq!(c.value(&register), RegisterValue::Numeric(expected));
        }
    }

    #[tokio::test]
    async fn booleans_read_back_as_booleans() {
        let c = coordinator(&[]);
        let eco = *c.catalog().lookup("REG_ECO_MODE_ON_OFF");
        c.write_and_refresh(&eco, true.into()).await.unwrap();
        assert_eq!(c.value(&eco), RegisterValue::Boolean(true));
        c.write_and_refresh(&eco, false.into()).await.unwrap();
        assert_eq!(c.value(&eco), RegisterValue::Boolean(false));
    }

    #[tokio::test]
    async fn failed_refresh_does_not_fail_the_write() {
        let c = coordinator(&[]);
        let setpoint = *c.catalog().lookup("REG_TC_SP");
        c.gateway()
            .fail_next_read(systemair_save::Error::Disconnected { attempts: 2 });

        c.write_and_refresh(&setpoint, 22.0.into()).await.unwrap();

        assert_eq!(c.gateway().writes(), [(2001, 220)]);
        assert!(!c.is_available());
    }

    #[tokio::test]
    async fn failed_write_skips_the_refresh() {
        let c = coordinator(&[]);
        let setpoint = *c.catalog().lookup("REG_TC_SP");
        c.gateway()
            .fail_next_write(systemair_save::Error::UnexpectedResponse("nope".into()));

        let error = c.write_and_refresh(&setpoint, 22.0.into()).await.unwrap_err();
        assert!(matches!(
            error,
            Error::Gateway(systemair_save::Error::UnexpectedResponse(_))
        ));
        assert!(c.gateway().reads().is_empty());
    }

    mod http {
        use super::*;
        use pretty_assertions::assert_eq;
        use systemair_save::ClientBuilder;
        use wiremock::matchers::{method, path};
        use wiremock::{Mock, MockServer, ResponseTemplate};

        #[tokio::test]
        async fn poll_and_write_through_save_connect() {
            let server = MockServer::start().await;
            Mock::given(method("GET"))
                .and(path("/mread"))
                .respond_with(
                    ResponseTemplate::new(200).set_body_string(r#"{"2000":215,"12101":"65486"}"#),
                )
                .mount(&server)
                .await;
            Mock::given(method("GET"))
                .and(path("/mwrite"))
                .respond_with(ResponseTemplate::new(200).set_body_string("OK"))
                .mount(&server)
                .await;

            let client = ClientBuilder::new(server.address().to_string())
                .timeout(Duration::from_millis(500))
                .build()
                .unwrap();
            let c = Coordinator::new(Catalog::systemair(), client);
            let setpoint = *c.catalog().lookup("REG_TC_SP");
            let oat = *c.catalog().lookup("REG_SENSOR_OAT");
            c.register_interest(&setpoint);
            c.register_interest(&oat);

            c.poll().await.unwrap();
            assert!(c.is_available());
            assert_eq!(c.value(&setpoint), RegisterValue::Numeric(21.5));
            assert_eq!(c.value(&oat), RegisterValue::Numeric(-5.0));

            c.write_and_refresh(&setpoint, 25.0.into()).await.unwrap();

            let requests = server.received_requests().await.unwrap();
            let queries: Vec<_> = requests
                .iter()
                .map(|r| (r.url.path().to_owned(), r.url.query().unwrap_or_default().to_owned()))
                .collect();
            assert_eq!(
                queries,
                [
                    ("/mread".to_owned(), "{%222000%22:1,%2212101%22:1}".to_owned()),
                    ("/mwrite".to_owned(), "{%222000%22:250}".to_owned()),
                    ("/mread".to_owned(), "{%222000%22:1,%2212101%22:1}".to_owned()),
                ]
            );
        }
    }
}
