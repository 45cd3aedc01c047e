use std::io::Write;

use crate::settings::VkhSettings;

/// 使用默认配置初始化日志，等价于 `init_log_with(&VkhSettings::from_env())`
pub fn init_log() {
    init_log_with(&VkhSettings::from_env());
}

/// 按照配置初始化全局 logger
///
/// 重复调用时不会 panic，后续调用直接忽略。
pub fn init_log_with(settings: &VkhSettings) {
    install(settings, false);
}

/// 测试中使用：日志交给 libtest 捕获，只有失败的测试才会输出
///
/// 每个测试都可以调用，logger 只会安装一次。
pub fn init_test_log() {
    install(&VkhSettings::from_env(), true);
}

fn install(settings: &VkhSettings, is_test: bool) {
    let result = env_logger::Builder::new()
        .format(|buf, record| {
            let info_style = buf
                .default_level_style(log::Level::Info)
                .fg_color(Some(anstyle::Color::Ansi(anstyle::AnsiColor::Green)));
            let warn_style = buf
                .default_level_style(log::Level::Warn)
                .fg_color(Some(anstyle::Color::Ansi(anstyle::AnsiColor::Yellow)));
            let error_style = buf
                .default_level_style(log::Level::Error)
                .fg_color(Some(anstyle::Color::Ansi(anstyle::AnsiColor::Red)));

            let level_style = match record.level() {
                log::Level::Info => info_style,
                log::Level::Warn => warn_style,
                log::Level::Error => error_style,
                _ => buf.default_level_style(record.level()),
            };
            let grey_style = info_style.fg_color(Some(anstyle::Color::Rgb(anstyle::RgbColor(110, 110, 110))));

            let line = record.line().unwrap_or(!0);
            let file = record.file().unwrap_or("").rsplit(['/', '\\']).next().unwrap_or("");
            let time = chrono::Local::now().format("%H:%M:%S%.3f");
            let level = record.level();
            let thread = std::thread::current();
            let thread_name = thread.name().unwrap_or("-");

            writeln!(
                buf,
                "{level_style}[{time}] {level}{level_style:#} {grey_style}[{thread_name}] [{file}:{line}]{grey_style:#} {}",
                record.args()
            )
        })
        .filter(None, settings.log_filter())
        .is_test(is_test)
        .try_init();

    if result.is_err() {
        log::debug!("logger already initialized, skip");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_log_twice() {
        init_test_log();
        init_test_log();
        init_log_with(&VkhSettings::default());
        log::info!("logger initialized repeatedly without panic");
    }
}
