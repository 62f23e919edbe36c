use ::std::ops::ControlFlow;
use ::tracing_subscriber::{fmt, prelude::*, EnvFilter};
use ::unpress::{capture_press_samples, KeyEvent, RepeatPolicy, Session};

/// Headroom added on top of the measured repeat delays during calibration.
const CALIBRATION_MARGIN_PERCENT: u32 = 4;

/// Number of held-key presses captured during calibration.
const CALIBRATION_SAMPLES: usize = 10;

pub fn main() {
    ::tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env())
        .init();

    let calibrate = ::std::env::args().any(|arg| arg == "--calibrate");

    // Either measure the terminal's actual repeat timing from a held key,
    // or trust the platform-typical defaults.
    let policy = if calibrate {
        println!("Press and hold any key to calibrate...");
        let samples =
            capture_press_samples(CALIBRATION_SAMPLES).expect("Failed to capture key presses");
        let policy = RepeatPolicy::from_samples(&samples, CALIBRATION_MARGIN_PERCENT)
            .expect("Captured samples did not yield a usable policy");
        println!(
            "Calibrated: initial delay {:?}, repeat delay {:?}",
            policy.initial_delay(),
            policy.repeat_delay()
        );
        policy
    } else {
        RepeatPolicy::default()
    };

    let session = Session::builder()
        .with_policy(policy)
        .build()
        .expect("Failed to configure session");

    println!("Hold keys to see inferred releases. Ctrl-D exits.");

    // Raw mode is active inside `run`, so output needs explicit `\r`.
    session
        .run(|event| {
            match event {
                KeyEvent::Down { key, .. } => print!("{key:?} pressed\r\n"),
                KeyEvent::Up { key, .. } => print!("{key:?} released\r\n"),
                KeyEvent::Repeat { .. } => (),
            }
            ControlFlow::Continue(())
        })
        .expect("Session failed");
}
