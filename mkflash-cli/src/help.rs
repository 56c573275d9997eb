//! Localized help output for the CLI.
//!
//! Builds a clap `Command` with translated section headings, subcommand
//! descriptions and argument help text.

use clap::CommandFactory;
use rust_i18n::t;

use crate::Cli;

/// Supported locales for i18n.
pub(crate) const SUPPORTED_LOCALES: &[&str] = &["en", "zh-CN"];

/// Detect the best matching locale from system settings.
pub(crate) fn detect_locale() -> String {
    let system_locale = sys_locale::get_locale().unwrap_or_else(|| "en".to_string());
    match_locale(&system_locale)
}

/// Map a system locale string (`zh_CN.UTF-8`, `en-US`, `C`) onto a supported one.
pub(crate) fn match_locale(system_locale: &str) -> String {
    // Drop the encoding suffix and use BCP 47 separators.
    let locale = system_locale
        .split('.')
        .next()
        .unwrap_or(system_locale)
        .replace('_', "-");

    if SUPPORTED_LOCALES.contains(&locale.as_str()) {
        return locale;
    }

    let lang_code = locale.split('-').next().unwrap_or(&locale);
    match lang_code.to_lowercase().as_str() {
        "zh" => "zh-CN".to_string(),
        _ => "en".to_string(),
    }
}

/// Print localized help for the subcommand named in `args`, or the main help.
pub(crate) fn print_localized_help(args: &[String]) {
    let mut app = build_localized_command();

    let subcommand = args.iter().skip(1).find_map(|token| {
        app.get_subcommands()
            .find(|s| s.get_name() == token.as_str())
            .cloned()
    });

    let _ = match subcommand {
        Some(mut sub) => sub.print_help(),
        None => app.print_help(),
    };
}

/// Build a clap `Command` with fully localized help output.
///
/// Clap stays the source of truth for structure; only user-visible text is
/// replaced with translations from the locale files.
pub(crate) fn build_localized_command() -> clap::Command {
    // Headings must be 'static; the CLI builds this once per run.
    let args_heading: &'static str =
        Box::leak(t!("help.arguments_heading").to_string().into_boxed_str());
    let opts_heading: &'static str =
        Box::leak(t!("help.options_heading").to_string().into_boxed_str());

    let tpl = format!(
        "{{bin}} {{version}}\n\n{{about}}\n\n\
         {usage_h}:\n  {{usage}}\n\n\
         {cmds_h}:\n{{subcommands}}\n\n\
         {opts_h}:\n{{options}}\n\n\
         {{after-help}}\n",
        usage_h = t!("help.usage_heading"),
        cmds_h = t!("help.commands_heading"),
        opts_h = t!("help.options_heading"),
    );

    let sub_tpl = format!(
        "{{bin}} {{version}}\n\n{{about}}\n\n\
         {usage_h}:\n  {{usage}}\n\n\
         {{all-args}}\n",
        usage_h = t!("help.usage_heading"),
    );

    let place = move |arg: clap::Arg| {
        let arg = localize_arg(arg);
        if arg.get_short().is_none() && arg.get_long().is_none() {
            arg.help_heading(args_heading)
        } else {
            arg.help_heading(opts_heading)
        }
    };

    Cli::command()
        .help_template(&tpl)
        .about(t!("app.about").to_string())
        .after_help(t!("app.after_help").to_string())
        .disable_help_flag(true)
        .disable_version_flag(true)
        .arg(
            clap::Arg::new("help")
                .short('h')
                .long("help")
                .help(t!("arg.help_flag.help").to_string())
                .action(clap::ArgAction::Help)
                .global(true),
        )
        .arg(
            clap::Arg::new("version")
                .short('V')
                .long("version")
                .help(t!("arg.version_flag.help").to_string())
                .action(clap::ArgAction::Version),
        )
        .mut_args(place)
        .mut_subcommands(move |sub| {
            let key = format!("cmd.{}.about", sub.get_name().replace('-', "_"));
            let localized = t!(&key).to_string();
            let sub = if localized != key {
                sub.about(localized)
            } else {
                sub
            };
            sub.help_template(sub_tpl.clone()).mut_args(place)
        })
        .disable_help_subcommand(true)
}

/// Replace an arg's help text with its localized version if available.
///
/// Looks up `arg.<id>.help` in the current locale and keeps the English
/// doc-comment text when there is no translation.
pub(crate) fn localize_arg(arg: clap::Arg) -> clap::Arg {
    let key = format!("arg.{}.help", arg.get_id().as_str());
    let localized = t!(&key).to_string();
    if localized != key {
        arg.help(localized)
    } else {
        arg
    }
}
