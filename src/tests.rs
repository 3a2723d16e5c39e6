#[cfg(test)]
mod tests {
    use crate::config::{DeadlinePolicy, EngineConfig};
    use crate::engine::ConvolutionEngine;
    use crate::error::ConvolutionError;
    use crate::impulse::ImpulseResponse;
    use crate::render::{read_input, render, render_with, write_wav};
    use crate::{Convolution, Sample};
    use approx::assert_abs_diff_eq;
    use std::time::Duration;

    const SAMPLE_RATE: u32 = 48000;
    const TIMEOUT: Duration = Duration::from_secs(10);

    fn wait_config(block_size: usize) -> EngineConfig {
        EngineConfig {
            min_block_size: block_size,
            sample_rate: SAMPLE_RATE,
            worker_threads: 3,
            deadline: DeadlinePolicy::Wait,
            ..EngineConfig::default()
        }
    }

    fn random_signal(rng: &mut fastrand::Rng, len: usize) -> Vec<Sample> {
        (0..len).map(|_| rng.f32() * 2.0 - 1.0).collect()
    }

    fn unit_at(position: usize, len: usize, gain: Sample) -> Vec<Sample> {
        let mut response = vec![0.0; len];
        response[position] = gain;
        response
    }

    fn direct_convolution(input: &[Sample], response: &[Sample]) -> Vec<Sample> {
        let mut out = vec![0.0; input.len() + response.len() - 1];
        for (i, &x) in input.iter().enumerate() {
            for (j, &h) in response.iter().enumerate() {
                out[i + j] += x * h;
            }
        }
        out
    }

    /// Runs `input` through the engine block by block, returning the
    /// interleaved output exactly as the callback produced it.
    fn run_blocks(engine: &mut ConvolutionEngine, input: &[Sample]) -> Vec<Sample> {
        let block_size = engine.block_size();
        let num_channels = engine.num_channels();
        assert_eq!(input.len() % block_size, 0);
        let mut out = vec![0.0; input.len() * num_channels];
        for (block, out_block) in input
            .chunks(block_size)
            .zip(out.chunks_mut(block_size * num_channels))
        {
            engine.process(block, out_block).unwrap();
        }
        out
    }

    #[test]
    fn silent_input_stays_silent() {
        let mut rng = fastrand::Rng::with_seed(1);
        let impulse = ImpulseResponse::mono(random_signal(&mut rng, 100), SAMPLE_RATE).unwrap();
        let mut engine = ConvolutionEngine::new(&impulse, wait_config(8)).unwrap();

        let output = run_blocks(&mut engine, &vec![0.0; 40 * 8]);
        for sample in output {
            assert_eq!(sample, 0.0);
        }
    }

    #[test]
    fn unit_impulse_delays_by_one_block() {
        let block_size = 8;
        let mut rng = fastrand::Rng::with_seed(2);
        let impulse = ImpulseResponse::mono(unit_at(0, 100, 1.0), SAMPLE_RATE).unwrap();
        let mut engine = ConvolutionEngine::new(&impulse, wait_config(block_size)).unwrap();
        assert_eq!(engine.latency_frames(), block_size);

        let input = random_signal(&mut rng, 30 * block_size);
        let output = run_blocks(&mut engine, &input);

        for i in 0..block_size {
            assert!(output[i].abs() < 1e-6);
        }
        for i in block_size..input.len() {
            assert!((output[i] - input[i - block_size]).abs() < 1e-5);
        }
    }

    #[test]
    fn stereo_impulse_fills_both_channels() {
        let block_size = 8;
        let mut rng = fastrand::Rng::with_seed(3);
        let impulse = ImpulseResponse::from_channels(
            vec![unit_at(0, 100, 1.0), unit_at(3, 100, 0.5)],
            SAMPLE_RATE,
        )
        .unwrap();
        let mut engine = ConvolutionEngine::new(&impulse, wait_config(block_size)).unwrap();
        assert_eq!(engine.num_channels(), 2);

        let input = random_signal(&mut rng, 30 * block_size);
        let output = run_blocks(&mut engine, &input);

        for n in 0..input.len() {
            let left = output[2 * n];
            let right = output[2 * n + 1];
            let expected_left = if n >= block_size {
                input[n - block_size]
            } else {
                0.0
            };
            let expected_right = if n >= block_size + 3 {
                0.5 * input[n - block_size - 3]
            } else {
                0.0
            };
            assert!((left - expected_left).abs() < 1e-5);
            assert!((right - expected_right).abs() < 1e-5);
        }
    }

    // A single tap inside each of the six blocks h1..h6 of a 128 frame plan:
    // every factor must come out with the same gain and the same delay.
    #[test]
    fn every_partition_has_unity_gain() {
        let block_size = 8;
        let mut rng = fastrand::Rng::with_seed(4);
        let input = random_signal(&mut rng, 40 * block_size);

        for position in [3, 12, 20, 40, 60, 100] {
            let impulse =
                ImpulseResponse::mono(unit_at(position, 101, 1.0), SAMPLE_RATE).unwrap();
            let mut engine = ConvolutionEngine::new(&impulse, wait_config(block_size)).unwrap();
            assert_eq!(engine.plan().factors(), &[1, 2, 4]);

            let output = run_blocks(&mut engine, &input);
            let delay = block_size + position;
            for n in 0..input.len() {
                let expected = if n >= delay { input[n - delay] } else { 0.0 };
                assert!(
                    (output[n] - expected).abs() < 1e-5,
                    "tap at {} frame {}: {} != {}",
                    position,
                    n,
                    output[n],
                    expected
                );
            }
        }
    }

    #[test]
    fn matches_direct_convolution() {
        let mut rng = fastrand::Rng::with_seed(5);
        let response = random_signal(&mut rng, 100);
        let input = random_signal(&mut rng, 317);
        let impulse = ImpulseResponse::mono(response.clone(), SAMPLE_RATE).unwrap();

        let rendered = render(&impulse, &input, wait_config(8)).unwrap();
        let expected = direct_convolution(&input, &response);

        assert_eq!(rendered.len(), 1);
        assert_eq!(rendered[0].len(), expected.len());
        for (a, b) in rendered[0].iter().zip(&expected) {
            assert_abs_diff_eq!(*a, *b, epsilon = 1e-3);
        }
    }

    #[test]
    fn matches_direct_convolution_with_larger_blocks() {
        let mut rng = fastrand::Rng::with_seed(6);
        let left = random_signal(&mut rng, 1500);
        let right = random_signal(&mut rng, 1200);
        let input = random_signal(&mut rng, 3000);
        let impulse =
            ImpulseResponse::from_channels(vec![left.clone(), right.clone()], SAMPLE_RATE)
                .unwrap();

        // 1500 frames pad to 2048 with B = 64: factors 1, 2, 4, 8
        let rendered = render(&impulse, &input, wait_config(64)).unwrap();
        let expected_left = direct_convolution(&input, &left);
        let mut right = right;
        right.resize(1500, 0.0);
        let expected_right = direct_convolution(&input, &right);

        for (a, b) in rendered[0].iter().zip(&expected_left) {
            assert_abs_diff_eq!(*a, *b, epsilon = 1e-2);
        }
        for (a, b) in rendered[1].iter().zip(&expected_right) {
            assert_abs_diff_eq!(*a, *b, epsilon = 1e-2);
        }
    }

    #[test]
    fn rendering_is_repeatable() {
        let mut rng = fastrand::Rng::with_seed(7);
        let impulse = ImpulseResponse::mono(random_signal(&mut rng, 200), SAMPLE_RATE).unwrap();
        let input = random_signal(&mut rng, 500);

        let first = render(&impulse, &input, wait_config(16)).unwrap();
        let second = render(&impulse, &input, wait_config(16)).unwrap();
        assert_eq!(first[0].len(), second[0].len());
        for (a, b) in first[0].iter().zip(&second[0]) {
            assert!((a - b).abs() < 1e-6);
        }
    }

    #[test]
    fn dispatches_two_tasks_per_due_factor() {
        let mut rng = fastrand::Rng::with_seed(8);
        let impulse = ImpulseResponse::mono(random_signal(&mut rng, 100), SAMPLE_RATE).unwrap();
        let mut engine = ConvolutionEngine::new(&impulse, wait_config(8)).unwrap();
        assert_eq!(engine.plan().period(), 8);

        run_blocks(&mut engine, &random_signal(&mut rng, 16 * 8));
        assert!(engine.wait_idle(TIMEOUT));

        // still due after tick 16: h2, h3 and h5 from tick 16, h4 from ticks
        // 14 and 16, h6 from ticks 12 and 16
        let deadline = std::time::Instant::now() + TIMEOUT;
        while engine.in_flight() != 7 {
            assert!(std::time::Instant::now() < deadline);
            std::thread::sleep(Duration::from_millis(1));
        }

        let stats = engine.stats();
        assert_eq!(stats.cycles, 16);
        // factor 1 every cycle, 2 every other, 4 every fourth
        assert_eq!(stats.dispatched, 2 * (16 + 8 + 4));
        assert_eq!(stats.deposited, stats.dispatched - 7);
        assert_eq!(stats.failed_tasks, 0);
        assert_eq!(stats.missed_deadlines, 0);
        assert_eq!(engine.clock_value(), 8);

        run_blocks(&mut engine, &random_signal(&mut rng, 3 * 8));
        assert_eq!(engine.clock_value(), 3);
    }

    #[test]
    fn rejects_wrong_block_lengths() {
        let impulse = ImpulseResponse::mono(unit_at(0, 100, 1.0), SAMPLE_RATE).unwrap();
        let mut engine = ConvolutionEngine::new(&impulse, wait_config(8)).unwrap();

        let mut output = vec![0.0; 8];
        assert!(matches!(
            engine.process(&[0.0; 7], &mut output),
            Err(ConvolutionError::BlockLength {
                expected: 8,
                actual: 7
            })
        ));
        let mut short = vec![0.0; 4];
        assert!(matches!(
            engine.process(&[0.0; 8], &mut short),
            Err(ConvolutionError::BlockLength {
                expected: 8,
                actual: 4
            })
        ));
        assert_eq!(engine.stats().cycles, 0);
    }

    #[test]
    fn rejects_mismatched_sample_rate() {
        let impulse = ImpulseResponse::mono(unit_at(0, 100, 1.0), 44100).unwrap();
        assert!(matches!(
            ConvolutionEngine::new(&impulse, wait_config(8)),
            Err(ConvolutionError::SampleRateMismatch {
                impulse: 44100,
                engine: SAMPLE_RATE
            })
        ));
    }

    #[test]
    fn reset_behaves_like_a_fresh_engine() {
        let block_size = 8;
        let mut rng = fastrand::Rng::with_seed(9);
        let impulse = ImpulseResponse::mono(random_signal(&mut rng, 100), SAMPLE_RATE).unwrap();
        let first = random_signal(&mut rng, 13 * block_size);
        let second = random_signal(&mut rng, 20 * block_size);

        let mut engine = ConvolutionEngine::new(&impulse, wait_config(block_size)).unwrap();
        run_blocks(&mut engine, &first);
        assert!(engine.reset(TIMEOUT));
        assert_eq!(engine.in_flight(), 0);
        assert_eq!(engine.clock_value(), 0);
        let after_reset = run_blocks(&mut engine, &second);

        let mut fresh = ConvolutionEngine::new(&impulse, wait_config(block_size)).unwrap();
        let expected = run_blocks(&mut fresh, &second);

        for (a, b) in after_reset.iter().zip(&expected) {
            assert!((a - b).abs() < 1e-5);
        }
    }

    #[test]
    fn real_time_policy_never_waits() {
        let mut rng = fastrand::Rng::with_seed(10);
        let impulse = ImpulseResponse::mono(random_signal(&mut rng, 1000), SAMPLE_RATE).unwrap();
        let config = wait_config(16).with_deadline(DeadlinePolicy::RealTime);
        let mut engine = ConvolutionEngine::new(&impulse, config).unwrap();

        run_blocks(&mut engine, &random_signal(&mut rng, 200 * 16));
        let stats = engine.stats();
        assert_eq!(stats.cycles, 200);
        assert_eq!(stats.failed_tasks, 0);

        assert!(engine.wait_idle(TIMEOUT));
        assert!(engine.reset(TIMEOUT));
        assert_eq!(engine.in_flight(), 0);
    }

    #[test]
    fn render_through_wav_files() {
        let dir = tempfile::tempdir().unwrap();
        let input_path = dir.path().join("input.wav");
        let output_path = dir.path().join("output.wav");

        let mut rng = fastrand::Rng::with_seed(11);
        let input = random_signal(&mut rng, 400);
        write_wav(&input_path, &[input.clone()], SAMPLE_RATE).unwrap();

        let (read_back, sample_rate) = read_input(&input_path).unwrap();
        assert_eq!(sample_rate, SAMPLE_RATE);
        assert_eq!(read_back, input);

        let impulse = ImpulseResponse::from_channels(
            vec![unit_at(0, 60, 1.0), unit_at(5, 60, -1.0)],
            SAMPLE_RATE,
        )
        .unwrap();
        let rendered = render(&impulse, &read_back, wait_config(8)).unwrap();
        write_wav(&output_path, &rendered, SAMPLE_RATE).unwrap();

        let reader = hound::WavReader::open(&output_path).unwrap();
        let spec = reader.spec();
        assert_eq!(spec.channels, 2);
        assert_eq!(spec.sample_format, hound::SampleFormat::Float);
        assert_eq!(reader.duration() as usize, 400 + 60 - 1);

        let samples: Vec<f32> = reader.into_samples::<f32>().map(|s| s.unwrap()).collect();
        for n in 0..400 {
            assert!((samples[2 * n] - input[n]).abs() < 1e-5);
        }
        for n in 5..405 {
            assert!((samples[2 * n + 1] + input[n - 5]).abs() < 1e-5);
        }
    }

    #[test]
    fn render_with_drains_the_tail() {
        let mut rng = fastrand::Rng::with_seed(12);
        let response = random_signal(&mut rng, 50);
        let impulse = ImpulseResponse::mono(response.clone(), SAMPLE_RATE).unwrap();
        let mut engine = ConvolutionEngine::new(&impulse, wait_config(4)).unwrap();

        let input = unit_at(0, 1, 1.0);
        let rendered = render_with(&mut engine, &input, 50).unwrap();
        assert_eq!(rendered[0].len(), 50);
        for (a, b) in rendered[0].iter().zip(&response) {
            assert!((a - b).abs() < 1e-5);
        }
    }
}
