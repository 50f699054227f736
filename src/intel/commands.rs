//! Chat command handling for the intel service.
//!
//! The relaying webhook appends the user id and nickname as the last two
//! whitespace tokens; everything before them is the command proper.

use chrono::Utc;

use crate::intel::service::IntelService;
use crate::intel::types::{Intel, IntelMenu, DING_TYPE_TEXT};

impl IntelService {
    pub async fn handle_command(&self, line: &str) -> String {
        let tokens: Vec<&str> = line.split_whitespace().collect();
        if tokens.len() < 3 {
            return "internal error".to_string();
        }
        let uid = tokens[tokens.len() - 2];
        let nick = tokens[tokens.len() - 1];
        let args = &tokens[..tokens.len() - 2];
        let op = args[0];

        match op {
            "help" => self.cmd_help(),
            "test" => self.cmd_test().await,
            "ls" => self.cmd_ls(args),
            "my" => self.filter.user_summary(uid),
            "s" => self.cmd_subscribe(args, uid, nick),
            "us" => self.cmd_unsubscribe(args, uid, nick),
            "ss" => self.cmd_allow(args, uid),
            "uss" => self.cmd_unallow(args, uid),
            "xs" => self.cmd_deny(args, uid),
            "uxs" => self.cmd_undeny(args, uid),
            "css" => self.cmd_clear(args, uid),
            other => format!("unknown command: `{}`", other),
        }
    }

    fn cmd_help(&self) -> String {
        let mut out = String::new();
        out.push_str("subscription commands:\n");
        out.push_str("ls (list all channels)\n");
        out.push_str("ls <chName> (list a channel's subchannels)\n");
        out.push_str("my (show your subscriptions)\n");
        out.push_str("s <chName> (subscribe a channel)\n");
        out.push_str("us <chName> (unsubscribe a channel)\n");
        out.push_str(
            "ss <chName> <sub_chName> (subscribe a subchannel; no subchannel subscribed means all)\n",
        );
        out.push_str("uss <chName> <sub_chName> (unsubscribe a subchannel)\n");
        out.push_str("xs <chName> <sub_chName> (exclude a subchannel)\n");
        out.push_str("uxs <chName> <sub_chName> (unexclude a subchannel)\n");
        out.push_str("css <chName> (clear a channel's subchannel settings, back to receive-all)\n");
        out
    }

    async fn cmd_test(&self) -> String {
        let make = |sub: &str, content: &str| Intel {
            seq: 0,
            time: Utc::now(),
            level: 1,
            main_type: "test".to_string(),
            sub_type: sub.to_string(),
            ding_type: DING_TYPE_TEXT.to_string(),
            title: "test-intel".to_string(),
            content: content.to_string(),
            tts: String::new(),
            url: String::new(),
        };
        self.process_intel(make("foo", "fooooooooooooooooo")).await;
        self.process_intel(make("bar", "barrrrrrrrrrrrrrrr")).await;
        "test intel sent".to_string()
    }

    fn cmd_ls(&self, args: &[&str]) -> String {
        let menus = self.menu.read().unwrap();
        match args.get(1) {
            None => {
                let mut out = String::from("channels available:\n");
                for (i, main) in menus.keys().enumerate() {
                    out.push_str(&format!("{}. {}\n", i + 1, main));
                }
                out
            }
            Some(raw) => {
                let main = self.resolve_channel(raw);
                match menus.get(&main) {
                    Some(menu) => menu_summary(&main, menu),
                    None => format!("channel `{}` does not exist", main),
                }
            }
        }
    }

    fn cmd_subscribe(&self, args: &[&str], uid: &str, nick: &str) -> String {
        let Some(raw) = args.get(1) else {
            return "not enough param for command `s`, type help for more info".to_string();
        };
        let main = self.resolve_channel(raw);
        if let Err(msg) = self.check_channel(&main, "") {
            return msg;
        }
        self.filter.subscribe(uid, nick, &main);
        format!("subscribe [{}] done", main)
    }

    fn cmd_unsubscribe(&self, args: &[&str], uid: &str, nick: &str) -> String {
        let Some(raw) = args.get(1) else {
            return "not enough param for command `us`, type help for more info".to_string();
        };
        let main = self.resolve_channel(raw);
        if let Err(msg) = self.check_channel(&main, "") {
            return msg;
        }
        self.filter.unsubscribe(uid, nick, &main);
        format!("unsubscribe [{}] done", main)
    }

    fn cmd_allow(&self, args: &[&str], uid: &str) -> String {
        let (Some(raw), Some(sub)) = (args.get(1), args.get(2)) else {
            return "not enough param for command `ss`, type help for more info".to_string();
        };
        let main = self.resolve_channel(raw);
        if let Err(msg) = self.check_channel(&main, sub) {
            return msg;
        }
        self.filter.allow_add(uid, &main, sub);
        format!("[{}] added to [{}]'s white list", sub, main)
    }

    fn cmd_unallow(&self, args: &[&str], uid: &str) -> String {
        let (Some(raw), Some(sub)) = (args.get(1), args.get(2)) else {
            return "not enough param for command `uss`, type help for more info".to_string();
        };
        let main = self.resolve_channel(raw);
        if let Err(msg) = self.check_channel(&main, sub) {
            return msg;
        }
        self.filter.allow_remove(uid, &main, sub);
        format!("[{}] removed from [{}]'s white list", sub, main)
    }

    fn cmd_deny(&self, args: &[&str], uid: &str) -> String {
        let (Some(raw), Some(sub)) = (args.get(1), args.get(2)) else {
            return "not enough param for command `xs`, type help for more info".to_string();
        };
        let main = self.resolve_channel(raw);
        if let Err(msg) = self.check_channel(&main, sub) {
            return msg;
        }
        self.filter.deny_add(uid, &main, sub);
        format!("[{}] added to [{}]'s black list", sub, main)
    }

    fn cmd_undeny(&self, args: &[&str], uid: &str) -> String {
        let (Some(raw), Some(sub)) = (args.get(1), args.get(2)) else {
            return "not enough param for command `uxs`, type help for more info".to_string();
        };
        let main = self.resolve_channel(raw);
        if let Err(msg) = self.check_channel(&main, sub) {
            return msg;
        }
        self.filter.deny_remove(uid, &main, sub);
        format!("[{}] removed from [{}]'s black list", sub, main)
    }

    fn cmd_clear(&self, args: &[&str], uid: &str) -> String {
        let Some(raw) = args.get(1) else {
            return "not enough param for command `css`, type help for more info".to_string();
        };
        let main = self.resolve_channel(raw);
        if let Err(msg) = self.check_channel(&main, "") {
            return msg;
        }
        self.filter.clear_channel(uid, &main);
        format!("[{}]'s white/black list cleared", main)
    }

    /// A numeric channel argument selects by 1-based position in the menu
    fn resolve_channel(&self, raw: &str) -> String {
        if let Ok(index) = raw.parse::<usize>() {
            let menus = self.menu.read().unwrap();
            if index >= 1 {
                if let Some(main) = menus.keys().nth(index - 1) {
                    return main.clone();
                }
            }
        }
        raw.to_string()
    }

    /// A subscription must name a declared channel; subtypes must be
    /// declared too unless the producer marked them uncertain.
    fn check_channel(&self, main: &str, sub: &str) -> Result<(), String> {
        let menus = self.menu.read().unwrap();
        let Some(menu) = menus.get(main) else {
            return Err(format!("channel [{}] does not exist", main));
        };
        if sub.is_empty() || menu.subtype_uncertain || menu.subtypes.contains_key(sub) {
            Ok(())
        } else {
            Err(format!("channel [{}] has no subchannel [{}]", main, sub))
        }
    }
}

fn menu_summary(main: &str, menu: &IntelMenu) -> String {
    if menu.subtype_uncertain {
        format!("{}:\n{}", main, menu.subtype_uncertain_reason)
    } else if menu.subtypes.is_empty() {
        format!("[{}]:\nno subchannels", main)
    } else {
        let mut out = format!("[{}]'s subchannels:\n", main);
        for (i, sub) in menu.subtypes.keys().enumerate() {
            out.push_str(&format!("{}. {}\n", i + 1, sub));
        }
        out
    }
}
