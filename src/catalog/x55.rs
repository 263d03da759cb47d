//! Command table for the X55 projector family.

use std::time::Duration;

use super::{Catalog, CodecInput, CommandEntry, GenericOp, ResponseMap};
use crate::serial::TransportSettings;

pub const NAME: &str = "x55";

pub fn settings() -> TransportSettings {
    TransportSettings::new(19200).with_read_timeout(Duration::from_millis(100))
}

const fn input(crc: [u8; 2], class: [u8; 2], code: [u8; 2]) -> CodecInput {
    CodecInput::new(crc, class, code)
}

pub fn catalog() -> Catalog {
    Catalog::new(vec![
        CommandEntry::new("Power")
            .subject("power state")
            .set([
                ("off", input([0x2a, 0xd3], [0x00, 0x60], [0x00, 0x00])),
                ("on", input([0xba, 0xd2], [0x00, 0x60], [0x01, 0x00])),
            ])
            .wording("off", "Turn power off", "Turns the projector off")
            .wording("on", "Turn power on", "Turns the projector on")
            .get(
                input([0x19, 0xd3], [0x00, 0x60], [0x00, 0x00]),
                Some(ResponseMap::from_iter([
                    ("off", [0x00, 0x00]),
                    ("on", [0x01, 0x00]),
                    ("cooldown", [0x02, 0x00]),
                ])),
            ),
        CommandEntry::new("Input")
            .set([
                ("RGB1", input([0xfe, 0xd2], [0x00, 0x20], [0x00, 0x00])),
                ("RGB2", input([0x3e, 0xd0], [0x00, 0x20], [0x04, 0x00])),
                ("Video", input([0x6e, 0xd3], [0x00, 0x20], [0x01, 0x00])),
                ("S-Video", input([0x9e, 0xd3], [0x00, 0x20], [0x02, 0x00])),
                ("Component", input([0xae, 0xd1], [0x00, 0x20], [0x05, 0x00])),
            ])
            .get(
                input([0xcd, 0xd2], [0x00, 0x20], [0x00, 0x00]),
                Some(ResponseMap::from_iter([
                    ("rgb1", [0x00, 0x00]),
                    ("rgb2", [0x04, 0x00]),
                    ("video", [0x01, 0x00]),
                    ("s-video", [0x02, 0x00]),
                    ("component", [0x05, 0x00]),
                ])),
            ),
        CommandEntry::new("Error-Status")
            .alias("error")
            .subject("error status")
            .tag("Error")
            .get(
                input([0xd9, 0xd8], [0x20, 0x60], [0x00, 0x00]),
                Some(ResponseMap::from_iter([
                    ("normal", [0x00, 0x00]),
                    ("cover_error", [0x01, 0x00]),
                    ("fan_error", [0x02, 0x00]),
                    ("lamp_error", [0x03, 0x00]),
                    ("temp_error", [0x04, 0x00]),
                    ("air_flow_error", [0x05, 0x00]),
                    ("lamp_time_error", [0x06, 0x00]),
                    ("cool_error", [0x07, 0x00]),
                    ("filter_error", [0x08, 0x00]),
                ])),
            ),
        CommandEntry::new("Brightness")
            .get(input([0x89, 0xd2], [0x03, 0x20], [0x00, 0x00]), None)
            .generic(GenericOp::Increment, input([0xef, 0xd2], [0x03, 0x20], [0x00, 0x00]))
            .generic(GenericOp::Decrement, input([0x3e, 0xd3], [0x03, 0x20], [0x00, 0x00]))
            .generic(GenericOp::Execute, input([0x58, 0xd3], [0x00, 0x70], [0x00, 0x00])),
        CommandEntry::new("Gamma")
            .set([
                ("Default-1", input([0x07, 0xe9], [0xa1, 0x30], [0x20, 0x00])),
                ("Default-2", input([0x97, 0xe8], [0xa1, 0x30], [0x21, 0x00])),
                ("Default-3", input([0x67, 0xe8], [0xa1, 0x30], [0x22, 0x00])),
                ("Custom-1", input([0x07, 0xfd], [0xa1, 0x30], [0x10, 0x00])),
                ("Custom-2", input([0x97, 0xfc], [0xa1, 0x30], [0x11, 0x00])),
                ("Custom-3", input([0x67, 0xfc], [0xa1, 0x30], [0x12, 0x00])),
            ])
            .wording("Default-1", "Set gamma to \"Default 1\"", "Sets the gamma to \"Default 1\"")
            .wording("Default-2", "Set gamma to \"Default 2\"", "Sets the gamma to \"Default 2\"")
            .wording("Default-3", "Set gamma to \"Default 3\"", "Sets the gamma to \"Default 3\"")
            .wording("Custom-1", "Set gamma to \"Custom 1\"", "Sets the gamma to \"Custom 1\"")
            .wording("Custom-2", "Set gamma to \"Custom 2\"", "Sets the gamma to \"Custom 2\"")
            .wording("Custom-3", "Set gamma to \"Custom 3\"", "Sets the gamma to \"Custom 3\"")
            .get(input([0xf4, 0xf0], [0xa1, 0x30], [0x00, 0x00]), None),
        CommandEntry::new("Lamp-Time")
            .tag("Lamp time")
            .get(input([0xc2, 0xff], [0x90, 0x10], [0x00, 0x00]), None)
            .generic(GenericOp::Execute, input([0x58, 0xdc], [0x30, 0x70], [0x00, 0x00])),
        CommandEntry::new("Filter-Time")
            .tag("Filter time")
            .get(input([0xc2, 0xf0], [0xa0, 0x10], [0x00, 0x00]), None)
            .generic(GenericOp::Execute, input([0x98, 0xc6], [0x40, 0x70], [0x00, 0x00])),
    ])
}
