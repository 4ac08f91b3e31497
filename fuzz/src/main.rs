extern crate afl;
extern crate protosift;

use afl::fuzz;
use protosift::{default_registry, ByteWindow, ParseContext, ProtocolKey};

fn main() {
    fuzz!(|data: &[u8]| {
        if data.is_empty() {
            return;
        }
        let registry = default_registry();
        let mut dissector = match registry.create(ProtocolKey::Port(1883)) {
            Ok(d) => d,
            Err(_) => return,
        };
        let window = ByteWindow::new(data);
        let mut context = ParseContext::new(window);
        let _ = dissector.parse(&mut context);
    });
}
