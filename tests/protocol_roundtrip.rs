use openafe::protocol::{checksum, decode_frame, Command, Message};
use openafe::{PulseConfig, Sample, SweepConfig, VoltammetryType};
use proptest::prelude::*;

fn voltammetry_type() -> impl Strategy<Value = VoltammetryType> {
    prop_oneof![
        Just(VoltammetryType::Cyclic),
        Just(VoltammetryType::DifferentialPulse),
        Just(VoltammetryType::SquareWave),
    ]
}

prop_compose! {
    fn sweep_config()(
        voltammetry_type in voltammetry_type(),
        starting_potential_millivolts in any::<i32>(),
        ending_potential_millivolts in any::<i32>(),
        scan_rate_millivolts_per_second in any::<u32>(),
        step_size_millivolts in any::<i32>(),
        number_of_cycles in any::<u32>(),
        settling_time_milliseconds in any::<u32>(),
    ) -> SweepConfig {
        SweepConfig {
            voltammetry_type,
            starting_potential_millivolts,
            ending_potential_millivolts,
            scan_rate_millivolts_per_second,
            step_size_millivolts,
            number_of_cycles,
            settling_time_milliseconds,
        }
    }
}

prop_compose! {
    fn pulse_config()(
        pulse_potential_millivolts in any::<i32>(),
        pulse_width_milliseconds in any::<u32>(),
        base_width_milliseconds in any::<u32>(),
        sample_period_pulse_milliseconds in any::<u32>(),
        sample_period_base_milliseconds in any::<u32>(),
        pulse_frequency_hertz in any::<u32>(),
    ) -> PulseConfig {
        PulseConfig {
            pulse_potential_millivolts,
            pulse_width_milliseconds,
            base_width_milliseconds,
            sample_period_pulse_milliseconds,
            sample_period_base_milliseconds,
            pulse_frequency_hertz,
        }
    }
}

proptest! {
    /// Any sweep command survives framing and decoding unchanged.
    #[test]
    fn sweep_command_roundtrip(sweep in sweep_config(), pulse in pulse_config()) {
        let command = Command::for_sweep(&sweep, &pulse);
        let frame = command.frame();

        prop_assert!(frame.is_ascii());
        prop_assert!(frame.ends_with('\n'));
        prop_assert_eq!(frame.matches('\n').count(), 1);

        let body = decode_frame(&frame).unwrap();
        let decoded: Command = body.parse().unwrap();
        prop_assert_eq!(decoded, command);
    }

    /// The cyclic command carries exactly the six sweep integers.
    #[test]
    fn cyclic_command_fields(sweep in sweep_config()) {
        let sweep = SweepConfig { voltammetry_type: VoltammetryType::Cyclic, ..sweep };
        let command = Command::for_sweep(&sweep, &PulseConfig::default());
        let body = command.to_string();

        let fields: Vec<&str> = body.split(',').collect();
        prop_assert_eq!(fields.len(), 7);
        prop_assert_eq!(fields[0], "CVW");
        prop_assert_eq!(fields[1].parse::<u32>().unwrap(), sweep.settling_time_milliseconds);
        prop_assert_eq!(fields[2].parse::<i32>().unwrap(), sweep.starting_potential_millivolts);
        prop_assert_eq!(fields[3].parse::<i32>().unwrap(), sweep.ending_potential_millivolts);
        prop_assert_eq!(fields[4].parse::<u32>().unwrap(), sweep.scan_rate_millivolts_per_second);
        prop_assert_eq!(fields[5].parse::<i32>().unwrap(), sweep.step_size_millivolts);
        prop_assert_eq!(fields[6].parse::<u32>().unwrap(), sweep.number_of_cycles);
    }

    /// Flipping any body byte breaks the checksum.
    #[test]
    fn corrupted_frames_are_detected(microamps in any::<u32>(), index in any::<prop::sample::Index>(), flip in 1u8..0x20) {
        let command = Command::SetCurrentRange { microamps };
        let body = command.to_string();
        let mut bytes = body.clone().into_bytes();
        let i = index.index(bytes.len());
        bytes[i] ^= flip;

        if let Ok(corrupted) = String::from_utf8(bytes) {
            let frame = format!("${}*{:02X}", corrupted, checksum(&body));
            prop_assert!(decode_frame(&frame).is_err());
        }
    }

    /// Points with finite values parse back to the same sample.
    #[test]
    fn point_messages_parse(potential in -5000i32..5000, current_centi in -100_000i32..100_000) {
        let potential = f64::from(potential);
        let current = f64::from(current_centi) / 100.0;
        let body = format!("SGL,{:.2},{:.2}", potential, current);

        let message: Message = body.parse().unwrap();
        prop_assert_eq!(message, Message::Point(Sample::new(potential, current)));
    }
}
