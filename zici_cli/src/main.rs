use clap::{Parser, Subcommand, ValueEnum};
use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use zici_core::store::sanitize_user_id;
use zici_core::*;

#[derive(Parser)]
#[command(name = "zici")]
#[command(about = "Character learning trainer", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Override data directory
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    /// Character dataset (CSV)
    #[arg(long, global = true)]
    catalog: Option<PathBuf>,

    /// Learner id (defaults to the configured user)
    #[arg(long, global = true)]
    user: Option<String>,

    /// Seed for reproducible selection and option order
    #[arg(long, global = true)]
    seed: Option<u64>,
}

#[derive(Subcommand)]
enum Commands {
    /// Study a set of characters, then take a quiz on them
    Learn {
        /// Selection scope (new, range, errors, needs-review, familiar,
        /// mastered, sequential, random, favorites)
        #[arg(long)]
        scope: Option<ScopeKind>,

        /// Number of characters
        #[arg(long)]
        count: Option<usize>,

        /// First sequence number
        #[arg(long)]
        start: Option<u32>,

        /// Last sequence number (range scope)
        #[arg(long)]
        end: Option<u32>,

        /// Question direction (reading-to-glyph, glyph-to-reading, mixed)
        #[arg(long)]
        mode: Option<QuizMode>,

        /// Use the saved review settings instead of learning settings
        #[arg(long)]
        review: bool,

        /// Answer automatically instead of reading stdin
        #[arg(long, value_enum)]
        auto_answer: Option<AutoAnswer>,
    },

    /// Take a diagnostic test over a sequence range
    Diagnose {
        #[arg(long)]
        count: Option<usize>,

        #[arg(long)]
        start: Option<u32>,

        #[arg(long)]
        end: Option<u32>,

        /// What to do after the result
        #[arg(long, value_enum)]
        then: Option<FollowUp>,

        #[arg(long, value_enum)]
        auto_answer: Option<AutoAnswer>,
    },

    /// Show learner statistics
    Stats,

    /// Inspect or edit the error book
    Errors {
        #[command(subcommand)]
        action: Option<ErrorsAction>,
    },

    /// Toggle a favorite, or list favorites when no glyph is given
    Favorite { glyph: Option<String> },

    /// Search the catalog by glyph, reading or example word
    Search { keyword: String },

    /// Manage stored learners
    Users {
        #[command(subcommand)]
        action: UsersAction,
    },
}

#[derive(Subcommand)]
enum ErrorsAction {
    List,
    Remove { glyph: String },
}

#[derive(Subcommand)]
enum UsersAction {
    List,
    Delete { user_id: String },
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum AutoAnswer {
    Correct,
    Wrong,
    First,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum FollowUp {
    Study,
    Review,
    None,
}

/// Resolved paths and identity for one invocation
struct Context {
    config: Config,
    data_dir: PathBuf,
    cache_dir: PathBuf,
    catalog_path: PathBuf,
    user_id: String,
    seed: Option<u64>,
}

impl Context {
    fn new(cli: &Cli, config: Config) -> Self {
        let data_dir = cli
            .data_dir
            .clone()
            .unwrap_or_else(|| config.data.data_dir.clone());

        // An explicit data dir keeps everything, including the cache, inside it
        let cache_dir = match &cli.data_dir {
            Some(dir) => dir.join("cache"),
            None => config.data.cache_dir.clone(),
        };

        let catalog_path = cli
            .catalog
            .clone()
            .or_else(|| config.data.catalog_path.clone())
            .unwrap_or_else(|| data_dir.join("zici.csv"));

        let user_id = sanitize_user_id(
            cli.user
                .as_deref()
                .unwrap_or(config.user.default_user.as_str()),
        );

        Self {
            config,
            data_dir,
            cache_dir,
            catalog_path,
            user_id,
            seed: cli.seed,
        }
    }

    fn store(&self) -> TieredStore {
        TieredStore::new(
            Box::new(FileStore::new(self.data_dir.join("users"))),
            Box::new(FileStore::new(self.cache_dir.join("users"))),
        )
    }

    fn load_catalog(&self) -> Result<Catalog> {
        let catalog = Catalog::load_csv(&self.catalog_path)?;
        for warning in catalog.validate() {
            tracing::warn!("Catalog: {}", warning);
        }
        tracing::info!(
            "Loaded {} characters from {:?}",
            catalog.len(),
            self.catalog_path
        );
        Ok(catalog)
    }

    fn open_engine(&self) -> Result<Engine> {
        let catalog = Arc::new(self.load_catalog()?);
        let mut options = EngineOptions::from_config(&self.config);
        options.seed = self.seed;
        Ok(Engine::open(
            catalog,
            self.user_id.clone(),
            Box::new(self.store()),
            &options,
        ))
    }
}

fn main() -> Result<()> {
    // Initialize logging
    zici_core::logging::init();

    let cli = Cli::parse();
    let config = Config::load()?;
    let ctx = Context::new(&cli, config);

    match cli.command {
        Commands::Learn {
            scope,
            count,
            start,
            end,
            mode,
            review,
            auto_answer,
        } => {
            let mut engine = ctx.open_engine()?;
            let overrides = LearnOverrides {
                scope,
                count,
                start,
                end,
                mode,
            };
            cmd_learn(&mut engine, overrides, review, auto_answer)?;
            finish(&mut engine);
            Ok(())
        }
        Commands::Diagnose {
            count,
            start,
            end,
            then,
            auto_answer,
        } => {
            let mut engine = ctx.open_engine()?;
            cmd_diagnose(&mut engine, count, start, end, then, auto_answer)?;
            finish(&mut engine);
            Ok(())
        }
        Commands::Stats => {
            let engine = ctx.open_engine()?;
            cmd_stats(&engine);
            Ok(())
        }
        Commands::Errors { action } => {
            let mut engine = ctx.open_engine()?;
            match action.unwrap_or(ErrorsAction::List) {
                ErrorsAction::List => print_error_book(&engine),
                ErrorsAction::Remove { glyph } => {
                    if engine.remove_error_entry(&glyph) {
                        println!("Removed {} from the error book", glyph);
                    } else {
                        println!("{} is not in the error book", glyph);
                    }
                }
            }
            finish(&mut engine);
            Ok(())
        }
        Commands::Favorite { glyph } => {
            let mut engine = ctx.open_engine()?;
            match glyph {
                Some(glyph) => cmd_toggle_favorite(&mut engine, &glyph),
                None => print_favorites(&engine),
            }
            finish(&mut engine);
            Ok(())
        }
        Commands::Search { keyword } => {
            let catalog = ctx.load_catalog()?;
            cmd_search(&catalog, &keyword);
            Ok(())
        }
        Commands::Users { action } => cmd_users(&ctx, action),
    }
}

/// Wait for pending saves and report if anything stayed unsaved
fn finish(engine: &mut Engine) {
    if let PersistenceStatus::Degraded { reason } = engine.flush() {
        eprintln!("Warning: progress could not be fully saved ({})", reason);
    }
}

// ============================================================================
// Learning
// ============================================================================

struct LearnOverrides {
    scope: Option<ScopeKind>,
    count: Option<usize>,
    start: Option<u32>,
    end: Option<u32>,
    mode: Option<QuizMode>,
}

impl LearnOverrides {
    fn is_empty(&self) -> bool {
        self.scope.is_none()
            && self.count.is_none()
            && self.start.is_none()
            && self.end.is_none()
            && self.mode.is_none()
    }
}

fn cmd_learn(
    engine: &mut Engine,
    overrides: LearnOverrides,
    review: bool,
    auto: Option<AutoAnswer>,
) -> Result<()> {
    if !overrides.is_empty() {
        if review {
            engine.update_review_settings(|s| {
                if let Some(scope) = overrides.scope {
                    s.scope = scope;
                }
                if let Some(count) = overrides.count {
                    s.review_count = count;
                }
                if let Some(mode) = overrides.mode {
                    s.quiz_mode = mode;
                }
            });
        } else {
            engine.update_settings(|s| {
                if let Some(scope) = overrides.scope {
                    s.scope = scope;
                }
                if let Some(count) = overrides.count {
                    s.learn_count = count;
                }
                if let Some(start) = overrides.start {
                    s.start_sequence = start;
                }
                if overrides.end.is_some() {
                    s.end_sequence = overrides.end;
                }
                if let Some(mode) = overrides.mode {
                    s.quiz_mode = mode;
                }
            });
        }
    }

    let selected = if review {
        engine.start_review_session()
    } else {
        engine.start_session_from_settings()
    };
    if selected == 0 {
        println!("Nothing to learn for this scope.");
        engine.reset();
        return Ok(());
    }

    if !run_learning(engine, auto)? {
        return Ok(());
    }
    run_quiz(engine, auto)?;
    print_session_summary(engine);
    Ok(())
}

/// Step through the learning cards; false when the learner quit
fn run_learning(engine: &mut Engine, auto: Option<AutoAnswer>) -> Result<bool> {
    let show_tones = engine.settings().show_tones;

    while let Some(item) = engine.current_item().cloned() {
        let progress = engine.learning_progress();
        println!();
        println!("[{}/{}]  {}", progress.current, progress.total, item.glyph);
        println!("  Reading:  {}", display_reading(&item.reading, show_tones));
        if !item.examples.is_empty() {
            println!("  Examples: {}", item.examples.join(", "));
        }
        if engine.is_favorite(&item.glyph) {
            println!("  ★ favorite");
        }

        if auto.is_some() {
            engine.advance_learning();
            continue;
        }

        match prompt("Enter: next, b: back, f: favorite, q: quit")?.as_str() {
            "b" => engine.retreat_learning(),
            "f" => {
                engine.toggle_favorite(&item.glyph);
            }
            "q" => {
                engine.reset();
                return Ok(false);
            }
            _ => engine.advance_learning(),
        }
    }
    Ok(true)
}

/// Ask every remaining question in the current quiz phase
fn run_quiz(engine: &mut Engine, auto: Option<AutoAnswer>) -> Result<()> {
    if engine.phase().is_quiz() {
        println!();
        println!("Quiz: {} questions", engine.questions().len());
    }

    while let Some(question) = engine.current_question().cloned() {
        let progress = engine.quiz_progress();
        println!();
        println!("[{}/{}] {}", progress.current, progress.total, question.prompt);
        for (idx, option) in question.options.iter().enumerate() {
            println!("  {}) {}", idx + 1, option);
        }

        let started = Instant::now();
        let answer = match auto {
            Some(mode) => auto_answer(&question, mode),
            None => read_choice(&question)?,
        };
        let elapsed = started.elapsed().as_secs_f64();

        match engine.submit_answer(&answer, elapsed) {
            Some(true) => println!("  ✓ Correct"),
            Some(false) => {
                println!("  ✗ The answer is {}", question.correct_answer);
                if let Some(explanation) = &question.explanation {
                    println!("    {}", explanation);
                }
                if !question.examples.is_empty() {
                    println!("    {}", question.examples.join(", "));
                }
            }
            None => {}
        }
        engine.advance_quiz();
    }
    Ok(())
}

fn auto_answer(question: &QuizQuestion, mode: AutoAnswer) -> String {
    match mode {
        AutoAnswer::Correct => question.correct_answer.clone(),
        AutoAnswer::Wrong => question
            .options
            .iter()
            .find(|o| **o != question.correct_answer)
            .unwrap_or(&question.correct_answer)
            .clone(),
        AutoAnswer::First => question
            .options
            .first()
            .unwrap_or(&question.correct_answer)
            .clone(),
    }
}

fn read_choice(question: &QuizQuestion) -> Result<String> {
    loop {
        let input = prompt("Your answer (number)")?;
        if let Ok(n) = input.parse::<usize>() {
            if let Some(option) = n.checked_sub(1).and_then(|i| question.options.get(i)) {
                return Ok(option.clone());
            }
        }
        if question.options.contains(&input) {
            return Ok(input);
        }
        println!("  Pick 1-{}", question.options.len());
    }
}

fn print_session_summary(engine: &Engine) {
    let correct = engine.results().iter().filter(|r| r.is_correct).count();
    println!();
    println!(
        "Session complete: {}/{} correct",
        correct,
        engine.results().len()
    );
    let stats = engine.stats();
    println!(
        "  Overall accuracy {}%, {} day streak",
        stats.accuracy_percent(),
        stats.streak_days
    );
}

fn display_reading(reading: &str, show_tones: bool) -> String {
    if show_tones {
        reading.to_string()
    } else {
        distractor::strip_tone(reading)
    }
}

// ============================================================================
// Diagnostic
// ============================================================================

fn cmd_diagnose(
    engine: &mut Engine,
    count: Option<usize>,
    start: Option<u32>,
    end: Option<u32>,
    then: Option<FollowUp>,
    auto: Option<AutoAnswer>,
) -> Result<()> {
    engine.enter_diagnostic();
    if count.is_some() || start.is_some() || end.is_some() {
        engine.update_diagnostic_settings(|s| {
            if let Some(count) = count {
                s.count = count;
            }
            if let Some(start) = start {
                s.range_start = start;
            }
            if let Some(end) = end {
                s.range_end = end;
            }
        });
    }

    if engine.start_diagnostic() == 0 {
        println!("No characters in the diagnostic range.");
        engine.reset_diagnostic();
        return Ok(());
    }
    run_quiz(engine, auto)?;

    let Some(result) = engine.diagnostic_result().cloned() else {
        return Ok(());
    };
    println!();
    println!(
        "Diagnostic result: {}/{} correct ({}%)",
        result.correct.len(),
        result.total,
        result.accuracy_percent
    );
    println!("  Average time: {}s per question", result.average_time_secs);
    if !result.incorrect.is_empty() {
        let missed: Vec<&str> = result.incorrect.iter().map(|i| i.glyph.as_str()).collect();
        println!("  Missed: {}", missed.join(" "));
    }

    let follow_up = match (then, auto) {
        (Some(follow_up), _) => follow_up,
        (None, Some(_)) => FollowUp::None,
        (None, None) => match prompt("s: study missed, r: review, Enter: done")?.as_str() {
            "s" => FollowUp::Study,
            "r" => FollowUp::Review,
            _ => FollowUp::None,
        },
    };

    match follow_up {
        FollowUp::Study => {
            if !engine.study_missed_items() {
                println!("Nothing missed. Well done!");
            } else if run_learning(engine, auto)? {
                run_quiz(engine, auto)?;
                print_session_summary(engine);
            }
        }
        FollowUp::Review => {
            if engine.build_review_session() {
                run_quiz(engine, auto)?;
                print_session_summary(engine);
            }
        }
        FollowUp::None => {}
    }
    Ok(())
}

// ============================================================================
// Reports
// ============================================================================

fn cmd_stats(engine: &Engine) {
    let stats = engine.stats();
    let counts = engine.review_counts();

    println!("Learner: {}", engine.user_id());
    println!("  Items studied:  {}", stats.total_items);
    println!("  Mastered:       {}", stats.mastered_items);
    println!("  Accuracy:       {}%", stats.accuracy_percent());
    println!("  Days studied:   {}", stats.days_studied);
    println!("  Streak:         {} day(s)", stats.streak_days);
    if let Some(last) = stats.last_study_date {
        println!("  Last studied:   {}", last);
    }
    println!();
    println!(
        "Review: {} needs review, {} familiar, {} mastered",
        counts.needs_review, counts.familiar, counts.mastered
    );
    println!("Error book: {} entries", engine.ledger().len());
}

fn print_error_book(engine: &Engine) {
    let entries = engine.ledger().entries();
    if entries.is_empty() {
        println!("Error book is empty.");
        return;
    }

    println!("Error book ({} entries)", entries.len());
    for entry in entries {
        println!(
            "  {}  {:<8} x{:<3} last {}  ({:?})",
            entry.glyph,
            entry.reading,
            entry.error_count,
            stats::format_timestamp(Some(entry.last_error_at)),
            entry.source
        );
    }
}

fn cmd_toggle_favorite(engine: &mut Engine, glyph: &str) {
    if engine.catalog().by_glyph(glyph).is_none() {
        println!("{} is not in the catalog", glyph);
    } else if engine.toggle_favorite(glyph) {
        println!("★ Added {} to favorites", glyph);
    } else {
        println!("Removed {} from favorites", glyph);
    }
}

fn print_favorites(engine: &Engine) {
    let favorites = engine.favorite_items();
    if favorites.is_empty() {
        println!("No favorites yet.");
        return;
    }
    for item in favorites {
        println!("  {}  {}", item.glyph, item.reading);
    }
}

fn cmd_search(catalog: &Catalog, keyword: &str) {
    let matches = catalog.search(keyword);
    if matches.is_empty() {
        println!("No matches for {}", keyword);
        return;
    }
    for item in matches {
        println!(
            "{:>5}  {}  {:<8} {}",
            item.sequence,
            item.glyph,
            item.reading,
            item.examples.join(" ")
        );
    }
}

fn cmd_users(ctx: &Context, action: UsersAction) -> Result<()> {
    let store = ctx.store();
    match action {
        UsersAction::List => {
            let users = store.list_users()?;
            if users.is_empty() {
                println!("No learners yet.");
            }
            for user in users {
                println!("{}", user);
            }
        }
        UsersAction::Delete { user_id } => {
            let user_id = sanitize_user_id(&user_id);
            if store.delete_user(&user_id)? {
                println!("Deleted {}", user_id);
            } else {
                println!("No data for {}", user_id);
            }
        }
    }
    Ok(())
}

fn prompt(message: &str) -> Result<String> {
    print!("{}\n> ", message);
    io::stdout().flush()?;

    let mut input = String::new();
    if io::stdin().lock().read_line(&mut input)? == 0 {
        return Err(Error::Other("input closed".into()));
    }
    Ok(input.trim().to_lowercase())
}
