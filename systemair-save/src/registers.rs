//! The register map of Systemair SAVE units as exposed through the SAVE Connect module.
//!
//! Addresses are the 1-based numbers printed in Systemair's Modbus documentation. The module itself addresses
//! registers 0-based, see [`RegisterDescriptor::wire_address`].

use std::collections::HashMap;

use crate::{Error, Result};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Signedness {
    Unsigned,
    Signed,
}

/// Whether a register is a read-only measurement/status (`Input`) or a read/write setting (`Holding`).
///
/// Only informative: the module accepts writes to either and it is up to callers to only write holding registers.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RegisterType {
    Input,
    Holding,
}

/// Subsets of the catalog that belong together when presenting a unit.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum RegisterGroup {
    /// Day-to-day operation: setpoint, user mode, fan levels and speeds.
    Operation,
    /// Temperature and humidity sensors.
    Sensor,
    /// Per-mode airflow settings and filter maintenance.
    Config,
    Alarm,
    /// Active functions (cooker hood, pressure guard, configurable digital inputs, ...).
    Function,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RegisterDescriptor {
    pub key: &'static str,
    pub description: &'static str,
    pub address: u16,
    pub signedness: Signedness,
    pub register_type: RegisterType,
    /// Decoded as `raw != 0`, skipping scaling and sign handling.
    pub is_boolean: bool,
    /// Divisor from raw value to engineering units. `None` means 1.
    pub scale_factor: Option<u32>,
    /// Inclusive bounds in raw (scaled) units. Only applied to writes.
    pub min_value: Option<i32>,
    pub max_value: Option<i32>,
    /// Register holding the upper 16 bits of a 32-bit value whose lower 16 bits live at `address`.
    pub composed_high_address: Option<u16>,
    pub group: Option<RegisterGroup>,
}

impl RegisterDescriptor {
    const fn new(
        register_type: RegisterType,
        address: u16,
        key: &'static str,
        description: &'static str,
    ) -> Self {
        Self {
            key,
            description,
            address,
            signedness: Signedness::Unsigned,
            register_type,
            is_boolean: false,
            scale_factor: None,
            min_value: None,
            max_value: None,
            composed_high_address: None,
            group: None,
        }
    }

    pub const fn input(address: u16, key: &'static str, description: &'static str) -> Self {
        Self::new(RegisterType::Input, address, key, description)
    }

    pub const fn holding(address: u16, key: &'static str, description: &'static str) -> Self {
        Self::new(RegisterType::Holding, address, key, description)
    }

    pub const fn signed(mut self) -> Self {
        self.signedness = Signedness::Signed;
        self
    }

    pub const fn boolean(mut self) -> Self {
        self.is_boolean = true;
        self
    }

    pub const fn scaled(mut self, factor: u32) -> Self {
        self.scale_factor = Some(factor);
        self
    }

    pub const fn bounds(mut self, min: i32, max: i32) -> Self {
        self.min_value = Some(min);
        self.max_value = Some(max);
        self
    }

    pub const fn high_word(mut self, address: u16) -> Self {
        self.composed_high_address = Some(address);
        self
    }

    pub const fn in_group(mut self, group: RegisterGroup) -> Self {
        self.group = Some(group);
        self
    }

    /// The 0-based address the SAVE Connect module uses in `mread`/`mwrite` queries and responses.
    pub const fn wire_address(&self) -> u16 {
        wire_address(self.address)
    }

    pub fn scale(&self) -> u32 {
        self.scale_factor.unwrap_or(1)
    }

    pub fn is_signed(&self) -> bool {
        self.signedness == Signedness::Signed
    }

    pub fn is_writable(&self) -> bool {
        self.register_type == RegisterType::Holding
    }
}

/// Converts a documented 1-based register address to the 0-based one used on the wire.
pub const fn wire_address(address: u16) -> u16 {
    address.saturating_sub(1)
}

/// An immutable set of register descriptors, indexed by their symbolic key.
#[derive(Clone, Debug)]
pub struct Catalog {
    registers: Vec<RegisterDescriptor>,
    by_key: HashMap<&'static str, usize>,
}

impl Catalog {
    /// # Panics
    ///
    /// When two descriptors share a key.
    pub fn new<I>(registers: I) -> Self
    where
        I: IntoIterator<Item = RegisterDescriptor>,
    {
        let registers: Vec<_> = registers.into_iter().collect();
        let mut by_key = HashMap::with_capacity(registers.len());
        for (index, register) in registers.iter().enumerate() {
            let existing = by_key.insert(register.key, index);
            assert!(existing.is_none(), "duplicate register key {}", register.key);
        }
        Self { registers, by_key }
    }

    /// All registers known for SAVE units.
    pub fn systemair() -> Self {
        Self::new(SYSTEMAIR_SAVE.iter().copied())
    }

    pub fn get(&self, key: &str) -> Option<&RegisterDescriptor> {
        self.by_key.get(key).map(|&index| &self.registers[index])
    }

    pub fn try_lookup(&self, key: &str) -> Result<&RegisterDescriptor> {
        self.get(key)
            .ok_or_else(|| Error::UnknownRegisterKey(key.to_owned()))
    }

    /// Looks up a register which is known to exist.
    ///
    /// # Panics
    ///
    /// When `key` is not in the catalog. Keys are compiled in, so a miss is a bug in the caller. Use
    /// [`Catalog::get`] for keys coming from users.
    pub fn lookup(&self, key: &str) -> &RegisterDescriptor {
        match self.try_lookup(key) {
            Ok(register) => register,
            Err(error) => panic!("{error}"),
        }
    }

    /// First register with the given (1-based) address.
    pub fn by_address(&self, address: u16) -> Option<&RegisterDescriptor> {
        self.registers.iter().find(|r| r.address == address)
    }

    pub fn group(&self, group: RegisterGroup) -> impl Iterator<Item = &RegisterDescriptor> {
        self.registers
            .iter()
            .filter(move |r| r.group == Some(group))
    }

    pub fn iter(&self) -> impl Iterator<Item = &RegisterDescriptor> {
        self.registers.iter()
    }

    pub fn len(&self) -> usize {
        self.registers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.registers.is_empty()
    }
}

impl Default for Catalog {
    fn default() -> Self {
        Self::systemair()
    }
}

// See "Modbus variable list" for SAVE units. Temperatures are in 1/10 °C.
#[rustfmt::skip]
const SYSTEMAIR_SAVE: &[RegisterDescriptor] = &[
    RegisterDescriptor::input(1001, "REG_DEMC_RH_HIGHEST", "Highest value of all RH sensors")
        .bounds(0, 100),
    RegisterDescriptor::holding(1101, "REG_USERMODE_HOLIDAY_TIME", "Time delay setting for user mode Holiday (days)")
        .bounds(1, 365),
    RegisterDescriptor::holding(1102, "REG_USERMODE_AWAY_TIME", "Time delay setting for user mode Away (hours)")
        .bounds(1, 72),
    RegisterDescriptor::holding(1103, "REG_USERMODE_FIREPLACE_TIME", "Time delay setting for user mode Fire Place (minutes)")
        .bounds(1, 60),
    RegisterDescriptor::holding(1104, "REG_USERMODE_REFRESH_TIME", "Time delay setting for user mode Refresh (minutes)")
        .bounds(1, 240),
    RegisterDescriptor::holding(1105, "REG_USERMODE_CROWDED_TIME", "Time delay setting for user mode Crowded (hours)")
        .bounds(1, 8),
    RegisterDescriptor::input(1111, "REG_USERMODE_REMAINING_TIME_L", "Remaining time for the state Holiday/Away/Fire Place/Refresh/Crowded, lower 16 bits")
        .high_word(1112),
    RegisterDescriptor::input(1112, "REG_USERMODE_REMAINING_TIME_H", "Remaining time for the state Holiday/Away/Fire Place/Refresh/Crowded, higher 16 bits"),
    RegisterDescriptor::holding(1135, "REG_USERMODE_CROWDED_AIRFLOW_LEVEL_SAF", "Fan speed level for mode Crowded")
        .bounds(3, 5)
        .in_group(RegisterGroup::Config),
    RegisterDescriptor::holding(1136, "REG_USERMODE_CROWDED_AIRFLOW_LEVEL_EAF", "Fan speed level for mode Crowded")
        .bounds(3, 5),
    RegisterDescriptor::holding(1137, "REG_USERMODE_REFRESH_AIRFLOW_LEVEL_SAF", "Fan speed level for mode Refresh")
        .bounds(3, 5)
        .in_group(RegisterGroup::Config),
    RegisterDescriptor::holding(1138, "REG_USERMODE_REFRESH_AIRFLOW_LEVEL_EAF", "Fan speed level for mode Refresh")
        .bounds(3, 5),
    RegisterDescriptor::holding(1139, "REG_USERMODE_FIREPLACE_AIRFLOW_LEVEL_SAF", "Fan speed level for mode Fireplace")
        .bounds(3, 5)
        .in_group(RegisterGroup::Config),
    RegisterDescriptor::holding(1140, "REG_USERMODE_FIREPLACE_AIRFLOW_LEVEL_EAF", "Fan speed level for mode Fireplace")
        .bounds(1, 3),
    RegisterDescriptor::holding(1141, "REG_USERMODE_AWAY_AIRFLOW_LEVEL_SAF", "Fan speed level for mode Away")
        .bounds(0, 3)
        .in_group(RegisterGroup::Config),
    RegisterDescriptor::holding(1142, "REG_USERMODE_AWAY_AIRFLOW_LEVEL_EAF", "Fan speed level for mode Away")
        .bounds(0, 3),
    RegisterDescriptor::holding(1143, "REG_USERMODE_HOLIDAY_AIRFLOW_LEVEL_SAF", "Fan speed level for mode Holiday")
        .bounds(0, 3)
        .in_group(RegisterGroup::Config),
    RegisterDescriptor::holding(1144, "REG_USERMODE_HOLIDAY_AIRFLOW_LEVEL_EAF", "Fan speed level for mode Holiday")
        .bounds(0, 3),
    RegisterDescriptor::holding(1145, "REG_USERMODE_COOKERHOOD_AIRFLOW_LEVEL_SAF", "Fan speed level for mode Cooker Hood")
        .bounds(1, 5)
        .in_group(RegisterGroup::Config),
    RegisterDescriptor::holding(1146, "REG_USERMODE_COOKERHOOD_AIRFLOW_LEVEL_EAF", "Fan speed level for mode Cooker Hood")
        .bounds(1, 5),
    RegisterDescriptor::holding(1147, "REG_USERMODE_VACUUMCLEANER_AIRFLOW_LEVEL_SAF", "Fan speed level for mode Vacuum Cleaner")
        .bounds(1, 5)
        .in_group(RegisterGroup::Config),
    RegisterDescriptor::holding(1148, "REG_USERMODE_VACUUMCLEANER_AIRFLOW_LEVEL_EAF", "Fan speed level for mode Vacuum Cleaner")
        .bounds(1, 5),
    RegisterDescriptor::input(1161, "REG_USERMODE_MODE", "Active User mode")
        .bounds(0, 12)
        .in_group(RegisterGroup::Operation),
    RegisterDescriptor::holding(1162, "REG_USERMODE_HMI_CHANGE_REQUEST", "New desired user mode as requested by HMI")
        .bounds(0, 7),
    RegisterDescriptor::holding(1177, "REG_PRESSURE_GUARD_AIRFLOW_LEVEL_SAF", "Fan speed level for configurable pressure guard function")
        .bounds(0, 5)
        .in_group(RegisterGroup::Config),
    RegisterDescriptor::holding(1178, "REG_PRESSURE_GUARD_AIRFLOW_LEVEL_EAF", "Fan speed level for configurable pressure guard function")
        .bounds(0, 5),
    RegisterDescriptor::input(12306, "REG_SENSOR_DI_COOKERHOOD", "Cooker hood")
        .boolean()
        .in_group(RegisterGroup::Function),
    RegisterDescriptor::input(12307, "REG_SENSOR_DI_VACUUMCLEANER", "Vacuum cleaner")
        .boolean()
        .in_group(RegisterGroup::Function),
    RegisterDescriptor::input(3114, "REG_FUNCTION_ACTIVE_PRESSURE_GUARD", "Pressure guard")
        .boolean()
        .in_group(RegisterGroup::Function),
    RegisterDescriptor::input(3115, "REG_FUNCTION_ACTIVE_CDI_1", "Configurable DI1")
        .boolean()
        .in_group(RegisterGroup::Function),
    RegisterDescriptor::input(3116, "REG_FUNCTION_ACTIVE_CDI_2", "Configurable DI2")
        .boolean()
        .in_group(RegisterGroup::Function),
    RegisterDescriptor::input(3117, "REG_FUNCTION_ACTIVE_CDI_3", "Configurable DI3")
        .boolean()
        .in_group(RegisterGroup::Function),
    RegisterDescriptor::input(12401, "REG_SENSOR_RPM_SAF", "Supply Air Fan RPM indication from TACHO")
        .bounds(0, 5000)
        .in_group(RegisterGroup::Operation),
    RegisterDescriptor::input(12402, "REG_SENSOR_RPM_EAF", "Extract Air Fan RPM indication from TACHO")
        .bounds(0, 5000)
        .in_group(RegisterGroup::Operation),
    RegisterDescriptor::holding(1131, "REG_USERMODE_MANUAL_AIRFLOW_LEVEL_SAF", "Fan speed level for mode Manual. Applies to both the SAF and the EAF fan")
        .bounds(0, 4)
        .in_group(RegisterGroup::Operation),
    RegisterDescriptor::input(14001, "REG_OUTPUT_SAF", "SAF fan speed")
        .bounds(0, 100)
        .in_group(RegisterGroup::Operation),
    RegisterDescriptor::input(14002, "REG_OUTPUT_EAF", "EAF fan speed")
        .bounds(0, 100)
        .in_group(RegisterGroup::Operation),
    RegisterDescriptor::holding(2001, "REG_TC_SP", "Temperature setpoint for the supply air temperature")
        .signed()
        .scaled(10)
        .bounds(120, 300)
        .in_group(RegisterGroup::Operation),
    RegisterDescriptor::input(14201, "REG_OUTPUT_Y3_ANALOG", "Cooler AO state")
        .signed()
        .bounds(0, 100),
    RegisterDescriptor::input(14202, "REG_OUTPUT_Y3_DIGITAL", "Cooler DO state")
        .signed()
        .boolean(),
    RegisterDescriptor::input(3101, "REG_FUNCTION_ACTIVE_COOLER", "Cooling active")
        .boolean(),
    RegisterDescriptor::input(3103, "REG_FUNCTION_ACTIVE_HEATER", "Heating active")
        .boolean(),
    RegisterDescriptor::input(3113, "REG_FUNCTION_ACTIVE_HEATER_COOL_DOWN", "Active Heater Cool Down")
        .signed()
        .boolean()
        .in_group(RegisterGroup::Function),
    RegisterDescriptor::input(14381, "REG_OUTPUT_TRIAC", "TRIAC control signal")
        .signed()
        .boolean(),
    RegisterDescriptor::input(2149, "REG_PWM_TRIAC_OUTPUT", "TRIAC PWM output")
        .bounds(0, 100),
    RegisterDescriptor::input(14101, "REG_OUTPUT_Y1_ANALOG", "Heater AO state")
        .signed()
        .bounds(0, 100),
    RegisterDescriptor::input(14102, "REG_OUTPUT_Y1_DIGITAL", "Heater DO state")
        .signed()
        .boolean(),
    RegisterDescriptor::holding(2505, "REG_ECO_MODE_ON_OFF", "Enabling of eco mode")
        .boolean()
        .in_group(RegisterGroup::Operation),
    RegisterDescriptor::input(7005, "REG_FILTER_REMAINING_TIME_L", "Remaining filter time in seconds, lower 16 bits")
        .high_word(7006)
        .in_group(RegisterGroup::Config),
    RegisterDescriptor::input(7006, "REG_FILTER_REMAINING_TIME_H", "Remaining filter time in seconds, higher 16 bits")
        .in_group(RegisterGroup::Config),
    RegisterDescriptor::holding(12102, "REG_SENSOR_OAT", "Outdoor Air Temperature sensor (standard)")
        .signed()
        .scaled(10)
        .bounds(-400, 800)
        .in_group(RegisterGroup::Sensor),
    RegisterDescriptor::holding(12103, "REG_SENSOR_SAT", "Supply Air Temperature sensor (standard)")
        .signed()
        .scaled(10)
        .bounds(-400, 800)
        .in_group(RegisterGroup::Sensor),
    RegisterDescriptor::holding(12105, "REG_SENSOR_EAT", "Extract Air Temperature sensor (accessory)")
        .signed()
        .scaled(10)
        .bounds(-400, 800),
    RegisterDescriptor::holding(12108, "REG_SENSOR_OHT", "Overheat Temperature sensor (Electrical Heater)")
        .signed()
        .scaled(10)
        .bounds(-400, 800)
        .in_group(RegisterGroup::Sensor),
    RegisterDescriptor::holding(12109, "REG_SENSOR_RHS", "Relative Humidity Sensor (Accessory)")
        .bounds(0, 100),
    RegisterDescriptor::holding(12544, "REG_SENSOR_PDM_EAT_VALUE", "PDM EAT sensor value (standard)")
        .signed()
        .scaled(10)
        .bounds(-400, 800)
        .in_group(RegisterGroup::Sensor),
    RegisterDescriptor::holding(12136, "REG_SENSOR_RHS_PDM", "PDM RHS sensor value (standard)")
        .bounds(0, 100)
        .in_group(RegisterGroup::Sensor),
    RegisterDescriptor::input(14104, "REG_OUTPUT_Y2_DIGITAL", "Heat Exchanger DO state")
        .boolean(),
    RegisterDescriptor::input(15016, "REG_ALARM_FROST_PROT_ALARM", "Frost protection")
        .bounds(0, 3)
        .in_group(RegisterGroup::Alarm),
    RegisterDescriptor::input(15023, "REG_ALARM_DEFROSTING_ALARM", "Defrosting")
        .bounds(0, 3)
        .in_group(RegisterGroup::Alarm),
    RegisterDescriptor::input(15030, "REG_ALARM_SAF_RPM_ALARM", "Supply air fan RPM")
        .bounds(0, 3)
        .in_group(RegisterGroup::Alarm),
    RegisterDescriptor::input(15037, "REG_ALARM_EAF_RPM_ALARM", "Extract air fan RPM")
        .bounds(0, 3)
        .in_group(RegisterGroup::Alarm),
    RegisterDescriptor::input(15072, "REG_ALARM_SAT_ALARM", "Supply air temperature")
        .bounds(0, 3)
        .in_group(RegisterGroup::Alarm),
    RegisterDescriptor::input(15086, "REG_ALARM_EAT_ALARM", "Extract air temperature")
        .bounds(0, 3)
        .in_group(RegisterGroup::Alarm),
    RegisterDescriptor::input(15121, "REG_ALARM_RGS_ALARM", "Rotation guard (RGS)")
        .bounds(0, 3)
        .in_group(RegisterGroup::Alarm),
    RegisterDescriptor::input(15142, "REG_ALARM_FILTER_ALARM", "Filter")
        .bounds(0, 3)
        .in_group(RegisterGroup::Alarm),
    RegisterDescriptor::input(15170, "REG_ALARM_CO2_ALARM", "CO2")
        .bounds(0, 3)
        .in_group(RegisterGroup::Alarm),
    RegisterDescriptor::input(15177, "REG_ALARM_LOW_SAT_ALARM", "Low supply air temperature")
        .bounds(0, 3)
        .in_group(RegisterGroup::Alarm),
    RegisterDescriptor::input(15530, "REG_ALARM_OVERHEAT_TEMPERATURE_ALARM", "Overheat temperature")
        .bounds(0, 3)
        .in_group(RegisterGroup::Alarm),
    RegisterDescriptor::input(15537, "REG_ALARM_FIRE_ALARM_ALARM", "Fire alarm")
        .bounds(0, 3)
        .in_group(RegisterGroup::Alarm),
    RegisterDescriptor::input(15544, "REG_ALARM_FILTER_WARNING_ALARM", "Filter warning")
        .bounds(0, 3)
        .in_group(RegisterGroup::Alarm),
    RegisterDescriptor::input(15901, "REG_ALARM_TYPE_A", "Indicates if an alarm Type A is active")
        .boolean()
        .in_group(RegisterGroup::Alarm),
    RegisterDescriptor::input(15902, "REG_ALARM_TYPE_B", "Indicates if an alarm Type B is active")
        .boolean()
        .in_group(RegisterGroup::Alarm),
    RegisterDescriptor::input(15903, "REG_ALARM_TYPE_C", "Indicates if an alarm Type C is active")
        .boolean()
        .in_group(RegisterGroup::Alarm),];

#[cfg(test)]
use pretty_assertions::assert_eq;

#[test]
fn catalog_keys_are_unique() {
    let catalog = Catalog::systemair();
    assert_eq!(catalog.len(), SYSTEMAIR_SAVE.len());
}

#[test]
fn composed_registers_resolve_their_high_word() {
    let catalog = Catalog::systemair();
    let composed: Vec<_> = catalog
        .iter()
        .filter_map(|r| r.composed_high_address.map(|high| (r.key, high)))
        .collect();
    assert_eq!(
        composed,
        vec![
            ("REG_USERMODE_REMAINING_TIME_L", 1112),
            ("REG_FILTER_REMAINING_TIME_L", 7006)
        ]
    );

    for (_, high) in composed {
        let partner = catalog.by_address(high).unwrap();
        assert!(partner.composed_high_address.is_none());
    }
}

#[test]
fn supply_air_setpoint() {
    let catalog = Catalog::systemair();
    let setpoint = catalog.lookup("REG_TC_SP");
    assert!(matches!(
        setpoint,
        RegisterDescriptor {
            address: 2001,
            signedness: Signedness::Signed,
            register_type: RegisterType::Holding,
            is_boolean: false,
            scale_factor: Some(10),
            min_value: Some(120),
            max_value: Some(300),
            composed_high_address: None,
            ..
        }
    ));
    assert_eq!(setpoint.wire_address(), 2000);
    assert_eq!(setpoint.scale(), 10);
    assert!(setpoint.is_writable());
}

#[test]
fn unscaled_registers_default_to_one() {
    let catalog = Catalog::systemair();
    assert_eq!(catalog.lookup("REG_SENSOR_RPM_SAF").scale(), 1);
    assert!(!catalog.lookup("REG_SENSOR_RPM_SAF").is_writable());
}

#[test]
fn groups() {
    let catalog = Catalog::systemair();
    let sensors: Vec<_> = catalog.group(RegisterGroup::Sensor).map(|r| r.key).collect();
    assert_eq!(
        sensors,
        vec![
            "REG_SENSOR_OAT",
            "REG_SENSOR_SAT",
            "REG_SENSOR_OHT",
            "REG_SENSOR_PDM_EAT_VALUE",
            "REG_SENSOR_RHS_PDM",
        ]
    );
    assert_eq!(catalog.group(RegisterGroup::Operation).count(), 8);
    assert_eq!(catalog.group(RegisterGroup::Alarm).count(), 16);
    assert!(catalog
        .group(RegisterGroup::Alarm)
        .filter(|r| r.is_boolean)
        .all(|r| r.key.starts_with("REG_ALARM_TYPE_")));
}

#[test]
fn unknown_keys() {
    let catalog = Catalog::systemair();
    assert!(catalog.get("REG_NOPE").is_none());
    assert!(matches!(
        catalog.try_lookup("REG_NOPE"),
        Err(Error::UnknownRegisterKey(key)) if key == "REG_NOPE"
    ));
}

#[test]
#[should_panic(expected = "REG_NOPE")]
fn lookup_of_unknown_key_panics() {
    Catalog::systemair().lookup("REG_NOPE");
}

#[test]
#[should_panic(expected = "duplicate register key")]
fn duplicate_keys_are_rejected() {
    Catalog::new([
        RegisterDescriptor::input(1, "REG_A", "a"),
        RegisterDescriptor::input(2, "REG_A", "a again"),
    ]);
}
