//! Four-timestamp time-sync exchange between a client node and a
//! simulated master over an in-memory CAN link.

mod timesync_system {
    use cantelem_rs::can_bus::CanBus;
    use cantelem_rs::clock::{TickClock, TickSource};
    use cantelem_rs::config::{DataEndpoint, DataType};
    use cantelem_rs::frame::len_to_dlc;
    use cantelem_rs::router::{EndpointHandler, Router, RouterConfig, RouterMode};
    use cantelem_rs::timesync::{
        decode_timesync_request, timesync_endpoint_handler, TimeSyncClient,
    };
    use cantelem_rs::worker::{attach_can_side, TelemetryWorker};
    use cantelem_rs::TelemetryError;

    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::mpsc::{channel, Receiver, Sender};
    use std::sync::{Arc, Mutex};

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

    fn cable_bus(tx: Sender<Wire>) -> Arc<CanBus> {
        Arc::new(CanBus::new(move |bytes: &[u8], std_id: u16| {
            tx.send((std_id, bytes.to_vec()))
                .map_err(|_| TelemetryError::Io("cable down"))
        }))
    }

    fn pump(rx: &Receiver<Wire>, dst: &CanBus) {
        while let Ok((std_id, bytes)) = rx.try_recv() {
            dst.on_rx_isr(std_id, len_to_dlc(bytes.len()).unwrap(), &bytes);
        }
    }

    struct ClientNode {
        bus: Arc<CanBus>,
        clock: Arc<TickClock>,
        ticks: ManualTicks,
        worker: TelemetryWorker,
    }

    fn make_client(cable: Sender<Wire>) -> ClientNode {
        let ticks = ManualTicks::new(0);
        let clock = Arc::new(TickClock::new(Box::new(ticks.clone())));
        let client = Arc::new(TimeSyncClient::new());
        let bus = cable_bus(cable);

        let handlers = vec![timesync_endpoint_handler(client.clone(), clock.clone())];
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

        let worker = TelemetryWorker::new(bus.clone(), router, clock.clone(), client);
        ClientNode {
            bus,
            clock,
            ticks,
            worker,
        }
    }

    struct MasterNode {
        bus: Arc<CanBus>,
        router: Arc<Router>,
        requests: Receiver<(u64, u64)>,
    }

    /// The master terminates TimeSync traffic and surfaces request fields
    /// so the test can reply with chosen t2/t3.
    fn make_master(cable: Sender<Wire>) -> MasterNode {
        let (req_tx, requests) = channel::<(u64, u64)>();
        let bus = cable_bus(cable);

        let handler = EndpointHandler::new_packet_handler(DataEndpoint::TimeSync, move |pkt| {
            if pkt.data_type() == DataType::TimeSyncRequest {
                let f = decode_timesync_request(pkt)?;
                req_tx
                    .send((f.seq, f.t1_ms))
                    .map_err(|_| TelemetryError::HandlerError("request channel"))?;
            }
            Ok(())
        });

        let router = Arc::new(Router::new(
            RouterMode::Sink,
            RouterConfig::new(vec![handler]),
            Box::new(|| 0u64),
        ));
        attach_can_side(&router, &bus, 3, 0x03).unwrap();

        MasterNode {
            bus,
            router,
            requests,
        }
    }

    fn master_service(master: &MasterNode) {
        master.bus.process_rx(0);
        master.router.process_all_queues_with_timeout(0).unwrap();
    }

    /// The §8 worked exchange: t1=10000, t2=10100, t3=10110, t4=10020
    /// gives offset 95, and the next now_ms reads ~10115.
    #[test]
    fn exchange_corrects_client_clock() {
        let (cable_cm, cable_cm_rx) = channel::<Wire>();
        let (cable_mc, cable_mc_rx) = channel::<Wire>();

        let mut client = make_client(cable_cm);
        let master = make_master(cable_mc);

        // t1: the worker fires its periodic request at 10 s.
        client.ticks.set(10_000);
        client.worker.run_once();
        assert_eq!(client.clock.now_ms(), 10_000);

        pump(&cable_cm_rx, &master.bus);
        master_service(&master);

        let (seq, t1) = master.requests.try_recv().expect("master saw the request");
        assert_eq!(t1, 10_000);

        // Master fills t2/t3 from its own (faster) clock.
        let (t2, t3) = (10_100u64, 10_110u64);
        master
            .router
            .log_ts(DataType::TimeSyncResponse, t3, &[seq, t1, t2, t3])
            .unwrap();

        // t4: the reply is consumed at client time 10 020.
        client.ticks.set(10_020);
        pump(&cable_mc_rx, &client.bus);
        client.worker.run_once();

        assert_eq!(
            client.clock.base_offset_ms(),
            95,
            "offset = ((t2-t1)+(t3-t4))/2"
        );
        assert_eq!(client.clock.now_ms(), 10_115);
    }

    /// A reply implying a >30 s correction is silently discarded.
    #[test]
    fn absurd_correction_is_rejected() {
        let (cable_cm, cable_cm_rx) = channel::<Wire>();
        let (cable_mc, cable_mc_rx) = channel::<Wire>();

        let mut client = make_client(cable_cm);
        let master = make_master(cable_mc);

        client.ticks.set(10_000);
        client.worker.run_once();
        pump(&cable_cm_rx, &master.bus);
        master_service(&master);
        let (seq, t1) = master.requests.try_recv().unwrap();

        // Claims the client is ~100 s behind.
        let (t2, t3) = (110_000u64, 110_010u64);
        master
            .router
            .log_ts(DataType::TimeSyncResponse, t3, &[seq, t1, t2, t3])
            .unwrap();

        client.ticks.set(10_020);
        pump(&cable_mc_rx, &client.bus);
        client.worker.run_once();

        assert_eq!(client.clock.base_offset_ms(), 0, "correction discarded");
        assert_eq!(client.clock.now_ms(), 10_020);
    }

    /// Replies to an older request still produce a usable sample; the math
    /// is self-correcting, so the client accepts them.
    #[test]
    fn stale_reply_is_accepted() {
        let (cable_cm, cable_cm_rx) = channel::<Wire>();
        let (cable_mc, cable_mc_rx) = channel::<Wire>();

        let mut client = make_client(cable_cm);
        let master = make_master(cable_mc);

        // Two requests go out; the master answers only the first.
        client.ticks.set(2_000);
        client.worker.run_once();
        client.ticks.set(4_000);
        client.worker.run_once();

        pump(&cable_cm_rx, &master.bus);
        master_service(&master);
        let (seq1, t1_first) = master.requests.try_recv().unwrap();
        let _ = master.requests.try_recv().unwrap();
        assert_eq!(t1_first, 2_000);

        // The master (50 ms ahead) received the first request instantly but
        // only replies now, long after the second request went out.
        let (t2, t3) = (t1_first + 50, 4_090u64);
        master
            .router
            .log_ts(DataType::TimeSyncResponse, t3, &[seq1, t1_first, t2, t3])
            .unwrap();

        client.ticks.set(4_040);
        pump(&cable_mc_rx, &client.bus);
        client.worker.run_once();

        assert_eq!(client.clock.base_offset_ms(), 50);
    }
}
