#![no_main]
use libfuzzer_sys::fuzz_target;
use protosift::{default_registry, ParseContext, ProtocolKey};

const KEYS: &[ProtocolKey] = &[
    ProtocolKey::EtherType(0x0806),
    ProtocolKey::Port(53),
    ProtocolKey::Port(22),
    ProtocolKey::Port(23),
    ProtocolKey::Port(80),
    ProtocolKey::Port(1883),
    ProtocolKey::Port(110),
    ProtocolKey::Port(3868),
    ProtocolKey::Port(2123),
    ProtocolKey::Port(1812),
    ProtocolKey::Port(2905),
    ProtocolKey::Port(36412),
];

// Exercises the invariant in spec.md §8: every dissector terminates on every
// byte window and never reads outside it. The first byte of the corpus picks
// which registered dissector to drive; the rest is the window it parses.
fuzz_target!(|data: &[u8]| {
    if data.is_empty() {
        return;
    }
    let key = KEYS[data[0] as usize % KEYS.len()];
    let registry = default_registry();
    let mut dissector = match registry.create(key) {
        Ok(d) => d,
        Err(_) => return,
    };
    let window = protosift::ByteWindow::new(&data[1..]);
    let mut context = ParseContext::new(window);
    let _ = dissector.parse(&mut context);
});
