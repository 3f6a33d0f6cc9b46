//! Multipong headless match runner
//!
//! Runs N peers over an in-process loopback hub with bot players and
//! reports whether they stayed in sync.
//!
//! ```text
//! multipong [--players 2|4] [--seconds N] [--latency MS] [--jitter MS]
//!           [--loss RATE] [--seed N] [--settings FILE] [--level FILE]
//! ```

#[cfg(not(target_arch = "wasm32"))]
mod headless {
    use std::collections::BTreeMap;

    use glam::Vec2;

    use multipong::net::{LinkConfig, LoopbackChannel, LoopbackHub, Session};
    use multipong::sim::geometry::rotate;
    use multipong::sim::{Field, GameEvent, StartOptions, World};
    use multipong::{Error, Result, Settings};

    /// Simulated frame length
    const FRAME_MS: u64 = 10;
    /// Bots re-aim this often
    const BOT_REACTION_MS: u64 = 40;
    /// Farthest a bot strays from its paddle's home position
    const BOT_REACH: f32 = 180.0;

    #[derive(Debug)]
    struct Options {
        players: usize,
        seconds: u64,
        link: LinkConfig,
        seed: u64,
        settings: Option<String>,
        level: Option<String>,
    }

    impl Default for Options {
        fn default() -> Self {
            Self {
                players: 2,
                seconds: 30,
                link: LinkConfig {
                    min_delay_ms: 20,
                    max_delay_ms: 40,
                    drop_rate: 0.0,
                },
                seed: 1,
                settings: None,
                level: None,
            }
        }
    }

    fn parse_args() -> Result<Options> {
        let mut opts = Options::default();
        let mut args = std::env::args().skip(1);
        let bad = |flag: &str| Error::Usage(format!("bad or missing value for {flag}"));
        while let Some(flag) = args.next() {
            let mut value = || args.next().ok_or_else(|| bad(&flag));
            match flag.as_str() {
                "--players" => opts.players = value()?.parse().map_err(|_| bad(&flag))?,
                "--seconds" => opts.seconds = value()?.parse().map_err(|_| bad(&flag))?,
                "--latency" => {
                    let ms: u64 = value()?.parse().map_err(|_| bad(&flag))?;
                    let spread = opts.link.max_delay_ms - opts.link.min_delay_ms;
                    opts.link.min_delay_ms = ms;
                    opts.link.max_delay_ms = ms + spread;
                }
                "--jitter" => {
                    let ms: u64 = value()?.parse().map_err(|_| bad(&flag))?;
                    opts.link.max_delay_ms = opts.link.min_delay_ms + ms;
                }
                "--loss" => opts.link.drop_rate = value()?.parse().map_err(|_| bad(&flag))?,
                "--seed" => opts.seed = value()?.parse().map_err(|_| bad(&flag))?,
                "--settings" => opts.settings = Some(value()?),
                "--level" => opts.level = Some(value()?),
                _ => return Err(Error::Usage(format!("unknown argument {flag}"))),
            }
        }
        Ok(opts)
    }

    /// Tracks the ball along its paddle's face
    struct Bot {
        paddle: usize,
        home: Vec2,
        axis: Vec2,
        next_move_ms: u64,
    }

    impl Bot {
        fn new(field: &Field, paddle: usize) -> Self {
            let spec = field.paddles[paddle];
            Self {
                paddle,
                home: Vec2::new(spec.x, spec.y),
                axis: rotate(Vec2::Y, spec.angle),
                next_move_ms: 0,
            }
        }

        fn drive(&mut self, session: &mut Session<LoopbackChannel>, now_ms: u64) {
            if now_ms < self.next_move_ms {
                return;
            }
            self.next_move_ms = now_ms + BOT_REACTION_MS;
            let world = session.world();
            let along = (world.ball().pos - self.home)
                .dot(self.axis)
                .clamp(-BOT_REACH, BOT_REACH);
            let target = self.home + self.axis * along;
            let rotation = world.paddle(self.paddle).map_or(0.0, |p| p.rotation);
            session.pointer_move(target, rotation);
        }
    }

    struct Peer {
        session: Session<LoopbackChannel>,
        bot: Bot,
    }

    pub fn run() -> Result<()> {
        let opts = parse_args()?;
        let settings = match &opts.settings {
            Some(path) => Settings::load(path)?,
            None => Settings::default(),
        };
        let field = match &opts.level {
            Some(path) => Field::load(path)?,
            None => Field::builtin(opts.players)?,
        };
        log::info!("Running {:?}", opts);

        let hub = LoopbackHub::new(opts.link, opts.seed);
        let users: Vec<u64> = (1..=field.paddles.len() as u64).collect();
        let roster: BTreeMap<u64, usize> = users
            .iter()
            .enumerate()
            .map(|(i, &user)| (user, i % field.players))
            .collect();

        let mut peers: Vec<Peer> = users
            .iter()
            .enumerate()
            .map(|(i, &user)| {
                let world = World::new(field.clone(), settings.clone());
                Peer {
                    session: Session::new(world, hub.connect(), user, roster.clone()),
                    bot: Bot::new(&field, i),
                }
            })
            .collect();

        for peer in &mut peers {
            peer.session.start(0, StartOptions::default());
        }

        let end_ms = opts.seconds * 1000;
        let mut now_ms = 0;
        while now_ms <= end_ms {
            hub.pump(now_ms);
            for (i, peer) in peers.iter_mut().enumerate() {
                peer.bot.drive(&mut peer.session, now_ms);
                for event in peer.session.update(now_ms) {
                    // Report from the host's point of view only
                    if i == 0 && let GameEvent::Goal { team, step } = event {
                        let scores: Vec<i32> =
                            peer.session.world().teams().iter().map(|t| t.score).collect();
                        log::info!("[{:>6} ms] goal {team} at step {step}, scores {scores:?}", now_ms);
                    }
                }
            }
            now_ms += FRAME_MS;
        }

        for peer in &mut peers {
            peer.session.stop();
        }

        let stats = hub.stats();
        println!(
            "\nMatch over after {}s: {} messages sent, {} delivered, {} dropped, {} undelivered",
            opts.seconds,
            stats.sent,
            stats.delivered,
            stats.dropped,
            hub.in_flight()
        );
        for peer in &peers {
            let world = peer.session.world();
            let s = peer.session.stats();
            let scores: Vec<i32> = world.teams().iter().map(|t| t.score).collect();
            println!(
                "user {} step {:>6} scores {:?} ball ({:.1}, {:.1}) desyncs {} resyncs {} rejected {}",
                peer.session.user(),
                world.step(),
                scores,
                world.ball().pos.x,
                world.ball().pos.y,
                s.desyncs,
                s.resyncs,
                s.rejected
            );
        }
        Ok(())
    }
}

#[cfg(not(target_arch = "wasm32"))]
fn main() {
    env_logger::init();
    log::info!("Multipong (headless) starting...");
    if let Err(e) = headless::run() {
        log::error!("{e}");
        eprintln!("error: {e}");
        std::process::exit(1);
    }
}

#[cfg(target_arch = "wasm32")]
fn main() {
    // Sessions are embedded by a host page; there is no standalone runner
}
