//! End-to-end tests over an in-memory CAN-FD link: two nodes, each with a
//! bus, a router and a worker, exchanging fragmented telemetry.

mod full_system {
    use cantelem_rs::can_bus::CanBus;
    use cantelem_rs::clock::{TickClock, TickSource};
    use cantelem_rs::config::{DataEndpoint, DataType};
    use cantelem_rs::frame::len_to_dlc;
    use cantelem_rs::router::{EndpointHandler, Router, RouterConfig, RouterMode};
    use cantelem_rs::telemetry_packet::TelemetryPacket;
    use cantelem_rs::timesync::TimeSyncClient;
    use cantelem_rs::worker::{attach_can_side, sd_endpoint_handler, TelemetryWorker};
    use cantelem_rs::{log_error_sync, TelemetryError};

    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::mpsc::{channel, Receiver, Sender};
    use std::sync::{Arc, Mutex};

    // ---------------- test rig ----------------

    #[derive(Clone)]
    struct ManualTicks(Arc<AtomicU32>);

    impl ManualTicks {
        fn new(start: u32) -> Self {
            Self(Arc::new(AtomicU32::new(start)))
        }
        fn set(&self, v: u32) {
            self.0.store(v, Ordering::Relaxed);
        }
    }

    impl TickSource for ManualTicks {
        fn ticks(&self) -> u32 {
            self.0.load(Ordering::Relaxed)
        }
        fn ticks_per_second(&self) -> u32 {
            1_000
        }
    }

    type Wire = (u16, Vec<u8>);

    /// A CAN bus whose TX lands on an mpsc "cable".
    fn cable_bus(tx: Sender<Wire>) -> Arc<CanBus> {
        Arc::new(CanBus::new(move |bytes: &[u8], std_id: u16| {
            tx.send((std_id, bytes.to_vec()))
                .map_err(|_| TelemetryError::Io("cable down"))
        }))
    }

    /// Move every frame currently on the cable into the destination bus's
    /// RX ring, as the ISR would. Returns the number of frames moved.
    fn pump(rx: &Receiver<Wire>, dst: &CanBus) -> usize {
        let mut n = 0;
        while let Ok((std_id, bytes)) = rx.try_recv() {
            dst.on_rx_isr(std_id, len_to_dlc(bytes.len()).unwrap(), &bytes);
            n += 1;
        }
        n
    }

    struct Node {
        bus: Arc<CanBus>,
        router: Arc<Router>,
        ticks: ManualTicks,
        worker: TelemetryWorker,
    }

    fn make_node(tx: Sender<Wire>, handlers: Vec<EndpointHandler>) -> Node {
        let ticks = ManualTicks::new(0);
        let clock = Arc::new(TickClock::new(Box::new(ticks.clone())));
        let bus = cable_bus(tx);

        let router_clock = {
            let c = clock.clone();
            Box::new(move || c.now_ms())
        };
        let router = Arc::new(Router::new(
            RouterMode::Sink,
            RouterConfig::new(handlers),
            router_clock,
        ));
        attach_can_side(&router, &bus, 3, 0x03).unwrap();

        let worker = TelemetryWorker::new(
            bus.clone(),
            router.clone(),
            clock.clone(),
            Arc::new(TimeSyncClient::new()),
        );
        Node {
            bus,
            router,
            ticks,
            worker,
        }
    }

    type PacketLog = Arc<Mutex<Vec<TelemetryPacket>>>;

    fn recording_handler(ep: DataEndpoint) -> (PacketLog, EndpointHandler) {
        let log: PacketLog = Arc::new(Mutex::new(Vec::new()));
        let log_c = log.clone();
        let h = EndpointHandler::new_packet_handler(ep, move |pkt| {
            log_c.lock().unwrap().push(pkt.clone());
            Ok(())
        });
        (log, h)
    }

    // ---------------- tests ----------------

    /// A sample logged on node A crosses the bus as a single-fragment
    /// message and lands in node B's SD-card handler intact.
    #[test]
    fn telemetry_crosses_the_link() {
        let (cable_ab, cable_ab_rx) = channel::<Wire>();
        let (cable_ba, _cable_ba_rx) = channel::<Wire>();

        let mut node_a = make_node(cable_ab, Vec::new());
        let (sd_log, sd) = recording_handler(DataEndpoint::SdCard);
        let mut node_b = make_node(cable_ba, vec![sd]);

        let gps = [37.7749_f32, -122.4194, 30.0];
        node_a.router.log_queue(DataType::GpsData, &gps).unwrap();
        node_a.worker.run_once();

        assert_eq!(pump(&cable_ab_rx, &node_b.bus), 1, "26-byte packet fits one fragment");
        node_b.worker.run_once();

        let seen = sd_log.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].data_type(), DataType::GpsData);
        let vals: Vec<f32> = seen[0]
            .payload()
            .chunks_exact(4)
            .map(|c| f32::from_le_bytes(c.try_into().unwrap()))
            .collect();
        assert_eq!(vals, gps);
    }

    /// A 512-byte error string needs ten fragments; node B still sees one
    /// packet with the exact text.
    #[test]
    fn large_error_packet_fragments_and_reassembles() {
        let (cable_ab, cable_ab_rx) = channel::<Wire>();
        let (cable_ba, _keep) = channel::<Wire>();

        let node_a = make_node(cable_ab, Vec::new());
        let (sd_log, sd) = recording_handler(DataEndpoint::SdCard);
        let mut node_b = make_node(cable_ba, vec![sd]);

        let text = "E".repeat(512);
        log_error_sync!(node_a.router, "{}", text).unwrap();

        // 10-byte envelope + 512-byte payload = 522 bytes -> ceil(522/56).
        assert_eq!(pump(&cable_ab_rx, &node_b.bus), 10);
        node_b.worker.run_once();

        let seen = sd_log.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].data_type(), DataType::GenericError);
        assert_eq!(seen[0].data_as_utf8().unwrap(), text);
    }

    /// Fragments delivered [2, 0, 1] still reassemble into the original
    /// payload, exactly once.
    #[test]
    fn out_of_order_fragments_reassemble() {
        let (cable_ab, cable_ab_rx) = channel::<Wire>();
        let (cable_ba, _keep) = channel::<Wire>();

        let node_a = make_node(cable_ab, Vec::new());
        let (sd_log, sd) = recording_handler(DataEndpoint::SdCard);
        let mut node_b = make_node(cable_ba, vec![sd]);

        // 150-byte payload: MessageData is too small, use GenericError text.
        let text = "m".repeat(140);
        log_error_sync!(node_a.router, "{}", text).unwrap();

        let mut frames = Vec::new();
        while let Ok(w) = cable_ab_rx.try_recv() {
            frames.push(w);
        }
        assert_eq!(frames.len(), 3);

        for i in [2usize, 0, 1] {
            let (std_id, bytes) = &frames[i];
            node_b
                .bus
                .on_rx_isr(*std_id, len_to_dlc(bytes.len()).unwrap(), bytes);
        }
        node_b.worker.run_once();

        let seen = sd_log.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].data_as_utf8().unwrap(), text);
    }

    /// The SD sink stores the serialized form of everything addressed to it.
    #[test]
    fn sd_storage_receives_serialized_form() {
        let (cable_ab, cable_ab_rx) = channel::<Wire>();
        let (cable_ba, _keep) = channel::<Wire>();

        let node_a = make_node(cable_ab, Vec::new());

        let store: Arc<Mutex<Vec<Vec<u8>>>> = Arc::new(Mutex::new(Vec::new()));
        let store_c = store.clone();
        let mut node_b = make_node(
            cable_ba,
            vec![sd_endpoint_handler(move |bytes| {
                store_c.lock().unwrap().push(bytes.to_vec());
                Ok(())
            })],
        );

        node_a
            .router
            .log(DataType::ImuData, &[0.1_f32, 0.2, 0.3, 1.1, 1.2, 1.3])
            .unwrap();
        pump(&cable_ab_rx, &node_b.bus);
        node_b.worker.run_once();

        let store = store.lock().unwrap();
        assert_eq!(store.len(), 1);
        let pkt = cantelem_rs::deserialize_packet(&store[0]).unwrap();
        assert_eq!(pkt.data_type(), DataType::ImuData);
    }

    /// Non-fragment frames bypass reassembly and reach raw-RX subscribers
    /// byte-for-byte.
    #[test]
    fn raw_frame_reaches_subscribers() {
        let (cable, _keep) = channel::<Wire>();
        let node = make_node(cable, Vec::new());

        let raw_seen: Arc<Mutex<Vec<Vec<u8>>>> = Arc::new(Mutex::new(Vec::new()));
        let raw_c = raw_seen.clone();
        node.bus
            .subscribe_rx(Arc::new(move |payload: &[u8]| {
                raw_c.lock().unwrap().push(payload.to_vec());
            }))
            .unwrap();

        let payload: Vec<u8> = (0..16u8).collect();
        node.bus
            .on_rx_isr(0x100, len_to_dlc(16).unwrap(), &payload);
        node.bus.process_rx(0);

        let seen = raw_seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0], payload);
    }

    /// Full duplex: both nodes log, both sinks record the other's traffic.
    #[test]
    fn bidirectional_exchange() {
        let (cable_ab, cable_ab_rx) = channel::<Wire>();
        let (cable_ba, cable_ba_rx) = channel::<Wire>();

        let (sd_a, handler_a) = recording_handler(DataEndpoint::SdCard);
        let (sd_b, handler_b) = recording_handler(DataEndpoint::SdCard);
        let mut node_a = make_node(cable_ab, vec![handler_a]);
        let mut node_b = make_node(cable_ba, vec![handler_b]);

        node_a
            .router
            .log_queue(DataType::BatteryStatus, &[12.5_f32, 1.8])
            .unwrap();
        node_b
            .router
            .log_queue(DataType::BarometerData, &[1013.2_f32, 24.5, 0.0])
            .unwrap();

        node_a.worker.run_once();
        node_b.worker.run_once();
        pump(&cable_ab_rx, &node_b.bus);
        pump(&cable_ba_rx, &node_a.bus);
        node_a.worker.run_once();
        node_b.worker.run_once();

        // Each sink saw its own egress (local delivery) plus the peer's.
        let a_types: Vec<DataType> = sd_a.lock().unwrap().iter().map(|p| p.data_type()).collect();
        let b_types: Vec<DataType> = sd_b.lock().unwrap().iter().map(|p| p.data_type()).collect();
        assert!(a_types.contains(&DataType::BatteryStatus));
        assert!(a_types.contains(&DataType::BarometerData));
        assert!(b_types.contains(&DataType::BatteryStatus));
        assert!(b_types.contains(&DataType::BarometerData));
    }

    /// The worker fires a time-sync request once the period elapses, and
    /// not before.
    #[test]
    fn worker_issues_periodic_sync_requests() {
        let (cable, cable_rx) = channel::<Wire>();
        let mut node = make_node(cable, Vec::new());

        node.ticks.set(1_999);
        node.worker.run_once();
        assert_eq!(pump_count(&cable_rx), 0, "period not yet elapsed");

        node.ticks.set(2_000);
        node.worker.run_once();
        assert_eq!(pump_count(&cable_rx), 1, "one request frame");

        node.ticks.set(2_100);
        node.worker.run_once();
        assert_eq!(pump_count(&cable_rx), 0, "within the period again");

        node.ticks.set(4_200);
        node.worker.run_once();
        assert_eq!(pump_count(&cable_rx), 1);
    }

    fn pump_count(rx: &Receiver<Wire>) -> usize {
        let mut n = 0;
        while rx.try_recv().is_ok() {
            n += 1;
        }
        n
    }
}
