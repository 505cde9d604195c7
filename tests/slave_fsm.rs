//! Scenario tests for the per-slave request state machine: dispatch
//! rotation, suspension, abort paths and completion semantics.

mod util;

use etherloom::{
    AlState, FoeRequest, FsmState, Master, RegRequest, RequestState, SdoRequest, SlaveStatus,
    SoeRequest, Transfers,
};
use std::sync::Arc;
use util::{cycle, identity, scripted_transfers, ScriptedTransfer};

fn master_with_slave(transfers: Transfers, status: SlaveStatus) -> (Master, usize) {
    let mut master = Master::new();

    let slave = master.add_slave(identity(0x1001), transfers);

    master.slave_mut(slave).unwrap().set_status(status);
    master.slave_ready(slave).unwrap();

    (master, slave)
}

#[test]
fn sdo_upload_over_multiple_cycles() {
    let (mut master, slave) =
        master_with_slave(scripted_transfers(3), SlaveStatus::new(AlState::Op));

    let request = Arc::new(SdoRequest::upload(0x1018, 1));

    master.submit_sdo_request(slave, request.clone()).unwrap();

    // Dispatch cycle: the CoE engine runs its first step immediately.
    assert_eq!(cycle(&mut master, 1), 1);
    assert_eq!(master.slave(slave).unwrap().fsm_state(), FsmState::SdoRequest);
    assert_eq!(request.state(), RequestState::Busy);

    // Two more non-terminal steps, one datagram each.
    for _ in 0..2 {
        assert_eq!(cycle(&mut master, 1), 1);
        assert_eq!(master.slave(slave).unwrap().fsm_state(), FsmState::SdoRequest);
    }

    // Terminal cycle: no datagram, request completed, machine back in the
    // rotation.
    assert_eq!(cycle(&mut master, 1), 0);
    assert_eq!(master.slave(slave).unwrap().fsm_state(), FsmState::Ready);
    assert_eq!(request.state(), RequestState::Success);
}

#[test]
fn register_write_with_zero_working_counter_fails() {
    let (mut master, slave) =
        master_with_slave(Transfers::unsupported(), SlaveStatus::new(AlState::Op));

    let request = Arc::new(RegRequest::write(0x0130, vec![0x04, 0x00]).unwrap());

    master.submit_reg_request(slave, request.clone()).unwrap();

    // The write goes out, but no slave incremented the working counter.
    assert_eq!(cycle(&mut master, 0), 1);
    assert_eq!(master.slave(slave).unwrap().fsm_state(), FsmState::RegRequest);

    cycle(&mut master, 0);

    assert_eq!(request.state(), RequestState::Failure);
    assert_eq!(master.slave(slave).unwrap().fsm_state(), FsmState::Ready);
}

#[test]
fn classes_complete_in_rotation_order() {
    let (mut master, slave) =
        master_with_slave(scripted_transfers(1), SlaveStatus::new(AlState::Op));

    let sdo = Arc::new(SdoRequest::upload(0x1018, 1));
    let reg = Arc::new(RegRequest::read(0x0130, 2).unwrap());
    let foe = Arc::new(FoeRequest::read("firmware.bin", 0).unwrap());
    let soe = Arc::new(SoeRequest::read(0, 33));

    master.submit_sdo_request(slave, sdo.clone()).unwrap();
    master.submit_reg_request(slave, reg.clone()).unwrap();
    master.submit_foe_request(slave, foe.clone()).unwrap();
    master.submit_soe_request(slave, soe.clone()).unwrap();

    let mut completion_order = Vec::new();

    for _ in 0..16 {
        cycle(&mut master, 1);

        for (name, state) in [
            ("sdo", sdo.state()),
            ("reg", reg.state()),
            ("foe", foe.state()),
            ("soe", soe.state()),
        ] {
            if state.is_terminal() && !completion_order.contains(&name) {
                completion_order.push(name);
            }
        }
    }

    assert_eq!(completion_order, vec!["sdo", "reg", "foe", "soe"]);

    for state in [sdo.state(), reg.state(), foe.state(), soe.state()] {
        assert_eq!(state, RequestState::Success);
    }
}

#[test]
fn error_flag_parks_machine_after_sdo_abort() {
    let status = SlaveStatus {
        state: AlState::Op,
        error_ack: true,
    };
    let (mut master, slave) = master_with_slave(scripted_transfers(1), status);

    let request = Arc::new(SdoRequest::upload(0x1018, 1));

    master.submit_sdo_request(slave, request.clone()).unwrap();

    assert_eq!(cycle(&mut master, 1), 0);
    assert_eq!(request.state(), RequestState::Failure);
    assert_eq!(master.slave(slave).unwrap().fsm_state(), FsmState::Idle);

    // Nothing moves until an external ready() call.
    let late = Arc::new(SdoRequest::upload(0x1018, 2));

    master.submit_sdo_request(slave, late.clone()).unwrap();
    cycle(&mut master, 1);

    assert_eq!(late.state(), RequestState::Queued);

    master.slave_mut(slave).unwrap().set_status(SlaveStatus::new(AlState::Op));
    master.slave_ready(slave).unwrap();
    cycle(&mut master, 1);

    assert_eq!(master.slave(slave).unwrap().fsm_state(), FsmState::SdoRequest);
}

#[test]
fn error_flag_keeps_rotation_reachable_after_reg_and_foe_aborts() {
    let status = SlaveStatus {
        state: AlState::Op,
        error_ack: true,
    };

    let (mut master, slave) = master_with_slave(scripted_transfers(1), status);

    let reg = Arc::new(RegRequest::read(0x0130, 2).unwrap());

    master.submit_reg_request(slave, reg.clone()).unwrap();
    cycle(&mut master, 1);

    assert_eq!(reg.state(), RequestState::Failure);
    assert_eq!(master.slave(slave).unwrap().fsm_state(), FsmState::Ready);

    let foe = Arc::new(FoeRequest::read("firmware.bin", 0).unwrap());

    master.submit_foe_request(slave, foe.clone()).unwrap();
    cycle(&mut master, 1);

    assert_eq!(foe.state(), RequestState::Failure);
    assert_eq!(master.slave(slave).unwrap().fsm_state(), FsmState::Ready);
}

#[test]
fn init_state_aborts_mailbox_classes_but_not_register_access() {
    let (mut master, slave) =
        master_with_slave(scripted_transfers(1), SlaveStatus::new(AlState::Init));

    let sdo = Arc::new(SdoRequest::upload(0x1018, 1));
    let reg = Arc::new(RegRequest::read(0x0130, 2).unwrap());

    master.submit_sdo_request(slave, sdo.clone()).unwrap();
    master.submit_reg_request(slave, reg.clone()).unwrap();

    // The SDO abort parks the machine in idle, but the register request is
    // still dispatched in the same cycle's rotation.
    cycle(&mut master, 1);

    assert_eq!(sdo.state(), RequestState::Failure);
    assert_eq!(reg.state(), RequestState::Busy);
    assert_eq!(master.slave(slave).unwrap().fsm_state(), FsmState::RegRequest);

    cycle(&mut master, 1);

    assert_eq!(reg.state(), RequestState::Success);
}

#[test]
fn config_slot_takes_precedence_over_external_requests() {
    let (mut master, slave) =
        master_with_slave(Transfers::unsupported(), SlaveStatus::new(AlState::Op));

    let config = master.add_slave_config(0, 0, 0x0000_0002, 0x0444_9999);

    master.attach_config(slave, config.id()).unwrap();

    let slot = config.reg_request_slot(RegRequest::read(0x0130, 2).unwrap());
    let external = Arc::new(RegRequest::read(0x0134, 2).unwrap());

    master.submit_reg_request(slave, external.clone()).unwrap();

    // The config-owned slot wins the first dispatch; the external request
    // stays queued.
    cycle(&mut master, 1);

    assert_eq!(slot.state(), RequestState::Busy);
    assert_eq!(external.state(), RequestState::Queued);

    cycle(&mut master, 1);

    assert_eq!(slot.state(), RequestState::Success);

    // The slot is done but stays registered; the external request gets its
    // turn now.
    cycle(&mut master, 1);

    assert_eq!(external.state(), RequestState::Busy);

    cycle(&mut master, 1);

    assert_eq!(external.state(), RequestState::Success);

    // Re-arming the slot makes the machine service it again.
    assert!(slot.requeue());
    cycle(&mut master, 1);

    assert_eq!(slot.state(), RequestState::Busy);
}

#[test]
fn config_teardown_mid_flight_abandons_the_slot() {
    let (mut master, slave) =
        master_with_slave(Transfers::unsupported(), SlaveStatus::new(AlState::Op));

    let config = master.add_slave_config(0, 0, 0x0000_0002, 0x0444_9999);
    let config_id = config.id();

    master.attach_config(slave, config_id).unwrap();

    let slot = config.reg_request_slot(RegRequest::read(0x0130, 2).unwrap());

    drop(slot);

    // Dispatch the slot, complete the round trip on the wire...
    master.tick();

    let frames = master.drain_tx(etherloom::DeviceIndex::Main);

    assert_eq!(frames.len(), 1);
    assert_eq!(master.slave(slave).unwrap().fsm_state(), FsmState::RegRequest);

    master.receive(frames[0].handle, &[0x08, 0x00], 1);

    // ...then tear the configuration down before the completion tick. The
    // machine observes a dead slot and returns to the rotation without
    // touching anything.
    master.remove_slave_config(config_id);
    drop(config);

    master.tick();

    assert_eq!(master.slave(slave).unwrap().fsm_state(), FsmState::Ready);
}

#[test]
fn no_progress_while_datagram_is_in_flight() {
    let (mut master, slave) =
        master_with_slave(Transfers::unsupported(), SlaveStatus::new(AlState::Op));

    let request = Arc::new(RegRequest::read(0x0130, 2).unwrap());

    master.submit_reg_request(slave, request.clone()).unwrap();

    master.tick();

    assert_eq!(master.slave(slave).unwrap().fsm_state(), FsmState::RegRequest);

    // Still queued: the machine must not move.
    master.tick();

    let frames = master.drain_tx(etherloom::DeviceIndex::Main);

    assert_eq!(frames.len(), 1);

    // Sent but unanswered: the machine must not move either.
    master.tick();

    assert_eq!(master.slave(slave).unwrap().fsm_state(), FsmState::RegRequest);
    assert_eq!(request.state(), RequestState::Busy);

    master.receive(frames[0].handle, &[0x08, 0x00], 1);
    master.tick();

    assert_eq!(request.state(), RequestState::Success);
    assert_eq!(request.data(), vec![0x08, 0x00]);
}

#[test]
fn idle_machine_ignores_pending_requests() {
    let mut master = Master::new();

    let slave = master.add_slave(identity(0x1001), scripted_transfers(1));

    master
        .slave_mut(slave)
        .unwrap()
        .set_status(SlaveStatus::new(AlState::Op));

    // No ready() call: the machine stays idle.
    let request = Arc::new(SdoRequest::upload(0x1018, 1));

    master.submit_sdo_request(slave, request.clone()).unwrap();

    for _ in 0..4 {
        assert_eq!(cycle(&mut master, 1), 0);
    }

    assert_eq!(request.state(), RequestState::Queued);
    assert_eq!(master.slave(slave).unwrap().fsm_state(), FsmState::Idle);
}

#[test]
fn failed_transfer_engine_fails_the_request() {
    let transfers = Transfers {
        coe: Box::new(ScriptedTransfer::new(2, false)),
        foe: Box::new(ScriptedTransfer::new(1, true)),
        soe: Box::new(ScriptedTransfer::new(1, true)),
    };

    let (mut master, slave) = master_with_slave(transfers, SlaveStatus::new(AlState::Op));

    let request = Arc::new(SdoRequest::upload(0x6040, 0));

    master.submit_sdo_request(slave, request.clone()).unwrap();

    assert_eq!(cycle(&mut master, 1), 1);
    assert_eq!(cycle(&mut master, 1), 1);
    assert_eq!(cycle(&mut master, 1), 0);

    assert_eq!(request.state(), RequestState::Failure);
    assert_eq!(master.slave(slave).unwrap().fsm_state(), FsmState::Ready);
}
