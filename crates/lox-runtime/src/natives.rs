//! Built-in native functions.

use crate::value::Value;
use crate::vm::Vm;

/// `clock()` - seconds since the VM started, as a double.
pub(crate) fn clock(vm: &Vm, _args: &[Value]) -> Value {
    Value::Number(vm.uptime())
}
