// tests/command_tests.rs
//! Integration tests for remote command execution

use gridlink_core::commands::{CommandExecutor, CommandRequest, CommandStatus};
use gridlink_core::hal::{SimulatedInverter, SimulatorConfig};
use gridlink_core::registers::{RegisterAccess, RegisterConfig, RegisterMap};
use gridlink_core::utils::time::ManualClock;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

fn quiet_inverter() -> Arc<SimulatedInverter> {
    Arc::new(SimulatedInverter::new(SimulatorConfig {
        jitter: 0,
        ..Default::default()
    }))
}

fn executor_with(inverter: Arc<SimulatedInverter>, registers: RegisterMap) -> CommandExecutor {
    let _ = env_logger::builder().is_test(true).try_init();

    CommandExecutor::new(
        inverter,
        registers,
        Arc::new(ManualClock::starting_at(Duration::from_secs(1_700_000_000))),
    )
}

fn executor(inverter: Arc<SimulatedInverter>) -> CommandExecutor {
    executor_with(inverter, RegisterMap::default_inverter())
}

fn write_command(id: u32, target: &str, value: f32) -> CommandRequest {
    CommandRequest {
        command_id: id,
        action: "write_register".to_string(),
        target_register: target.to_string(),
        value,
        timestamp: 0,
    }
}

#[tokio::test]
async fn test_queue_and_execute_write() {
    let inverter = quiet_inverter();
    let executor = executor(inverter.clone());

    executor.queue_command(write_command(1, "export_power", 50.0)).unwrap();
    assert_eq!(executor.pending(), 1);

    let batch = executor.execute_pending().await;

    assert_eq!(batch.len(), 1);
    assert_eq!(batch[0].status, CommandStatus::Success);
    assert_eq!(batch[0].actual_value, 50.0);
    assert_eq!(inverter.register(8), Some(50));
    assert_eq!(executor.pending(), 0);
    assert!(executor.is_processed(1));
}

#[tokio::test]
async fn test_target_accepts_numeric_address() {
    let inverter = quiet_inverter();
    let executor = executor(inverter.clone());

    executor.queue_command(write_command(2, "8", 75.0)).unwrap();
    let batch = executor.execute_pending().await;

    assert_eq!(batch[0].status, CommandStatus::Success);
    assert_eq!(inverter.register(8), Some(75));
}

#[tokio::test]
async fn test_gain_converts_engineering_value_to_raw() {
    // A writable register with the divisor scaling of the voltage bank
    let inverter = quiet_inverter();
    inverter.set_register(12, 0);
    let registers = RegisterMap::new(vec![RegisterConfig {
        address: 12,
        name: "Voltage_setpoint".to_string(),
        alias: "voltage_setpoint".to_string(),
        unit: "V".to_string(),
        gain: 10.0,
        access: RegisterAccess::ReadWrite,
    }]);
    let executor = executor_with(inverter.clone(), registers);

    executor
        .queue_command(write_command(3, "voltage_setpoint", 23.5))
        .unwrap();
    let batch = executor.execute_pending().await;

    assert_eq!(batch[0].status, CommandStatus::Success);
    assert_eq!(inverter.register(12), Some(235));
}

#[tokio::test]
async fn test_duplicate_command_id_refused() {
    let executor = executor(quiet_inverter());

    executor.queue_command(write_command(4, "export_power", 10.0)).unwrap();
    executor.execute_pending().await;

    let refused = executor.queue_command(write_command(4, "export_power", 20.0));
    assert!(refused.is_err());
    assert_eq!(executor.pending(), 0);
    // Only the first execution is on record
    assert_eq!(executor.results().len(), 1);
}

#[tokio::test]
async fn test_read_only_register_refused_with_recorded_result() {
    let executor = executor(quiet_inverter());

    // Register 0 is read-only in the default table
    let refused = executor.queue_command(write_command(5, "voltage", 230.0));
    assert!(refused.is_err());

    let results = executor.results();
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].command_id, 5);
    assert_eq!(results[0].status, CommandStatus::InvalidRegister);
    assert!(results[0].error_details.contains("read-only"));
    // The id is burned: a retry with the same id is a duplicate
    assert!(executor.is_processed(5));
}

#[tokio::test]
async fn test_unknown_register_refused() {
    let executor = executor(quiet_inverter());

    let refused = executor.queue_command(write_command(6, "bogus_register", 1.0));
    assert!(refused.is_err());

    let results = executor.results();
    assert_eq!(results[0].status, CommandStatus::InvalidRegister);
    assert!(results[0].error_details.contains("bogus_register"));
}

#[tokio::test]
async fn test_unsupported_action_refused() {
    let executor = executor(quiet_inverter());

    let request = CommandRequest {
        command_id: 7,
        action: "reboot".to_string(),
        target_register: "export_power".to_string(),
        value: 0.0,
        timestamp: 0,
    };

    assert!(executor.queue_command(request).is_err());
    assert_eq!(executor.results()[0].status, CommandStatus::Failed);
}

#[tokio::test]
async fn test_value_outside_register_range_refused() {
    let executor = executor(quiet_inverter());

    let refused = executor.queue_command(write_command(8, "export_power", -5.0));
    assert!(refused.is_err());
    assert_eq!(executor.results()[0].status, CommandStatus::InvalidValue);

    let refused = executor.queue_command(write_command(9, "export_power", 70_000.0));
    assert!(refused.is_err());
    assert_eq!(executor.results()[1].status, CommandStatus::InvalidValue);
}

#[tokio::test]
async fn test_adapter_failure_reports_timeout() {
    // Register 42 exists in the table but not in the inverter, so the
    // write itself fails after validation passes
    let inverter = quiet_inverter();
    let registers = RegisterMap::new(vec![RegisterConfig {
        address: 42,
        name: "Ghost".to_string(),
        alias: "ghost".to_string(),
        unit: "".to_string(),
        gain: 1.0,
        access: RegisterAccess::Write,
    }]);
    let executor = executor_with(inverter, registers);

    executor.queue_command(write_command(10, "ghost", 1.0)).unwrap();
    let batch = executor.execute_pending().await;

    assert_eq!(batch[0].status, CommandStatus::Timeout);
    assert!(batch[0].error_details.contains("42"));
    // Failed executions still consume the id
    assert!(executor.is_processed(10));
}

#[tokio::test]
async fn test_callbacks_fire_per_executed_command() {
    let executor = executor(quiet_inverter());

    let fired = Arc::new(AtomicUsize::new(0));
    let counter = fired.clone();
    executor.on_executed(Box::new(move |result| {
        assert_eq!(result.status, CommandStatus::Success);
        counter.fetch_add(1, Ordering::Relaxed);
    }));

    executor.queue_command(write_command(11, "export_power", 10.0)).unwrap();
    executor.queue_command(write_command(12, "export_power", 20.0)).unwrap();
    let batch = executor.execute_pending().await;

    assert_eq!(batch.len(), 2);
    assert_eq!(fired.load(Ordering::Relaxed), 2);
}

#[tokio::test]
async fn test_queue_overflow_refused() {
    let executor = executor(quiet_inverter());

    for id in 0..10 {
        executor.queue_command(write_command(id, "export_power", 1.0)).unwrap();
    }
    let overflow = executor.queue_command(write_command(99, "export_power", 1.0));
    assert!(overflow.is_err());
    assert_eq!(executor.pending(), 10);
}

#[tokio::test]
async fn test_results_clear_after_reporting() {
    let executor = executor(quiet_inverter());

    executor.queue_command(write_command(20, "export_power", 10.0)).unwrap();
    executor.execute_pending().await;
    assert_eq!(executor.results().len(), 1);

    executor.clear_results();
    assert!(executor.results().is_empty());
    // Clearing results does not forget processed ids
    assert!(executor.is_processed(20));
}
