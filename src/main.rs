//! # Command Line Interface
//!
//! Subcommands for inspecting ProDOS disk images from the shell.  This
//! is a thin layer over `fs::prodos::Volume`; mounting the volume as a
//! host filesystem is a separate front end built on the same library.

use clap::{arg, ArgAction, Command};
use colored::*;
use std::io::Write;

use prodosfs::fs::prodos::types::FileType;
use prodosfs::fs::prodos::Volume;
use prodosfs::DYNERR;

const RCH: &str = "unreachable was reached";

/// translate a ProDOS text file for the host: strip the high bit and
/// turn carriage returns into line feeds
fn text_to_host(dat: &[u8]) -> Vec<u8> {
    dat.iter()
        .map(|b| match b & 0x7f {
            0x0d => 0x0a,
            c => c,
        })
        .collect()
}

fn main() -> Result<(), DYNERR> {
    env_logger::init();
    let long_help = "prodosfs reads Apple II ProDOS 8 disk images.
Images may be in ProDOS block order or DOS 3.3 sector order; sector
ordered and password protected volumes are recognized automatically.
For protected volumes put the password in a file and name it with the
PRODOSFS_PASSWORD_FILE environment variable.
Set RUST_LOG environment variable to control logging level.
  levels: trace,debug,info,warn,error

Examples:
---------
directory listing:     `prodosfs catalog myimg.po`
listing of a subdir:   `prodosfs catalog myimg.po /games`
copy file to host:     `prodosfs get myimg.po /notes/todo -t > todo.txt`
show file metadata:    `prodosfs attrs myimg.po /notes/todo`
write block ordered:   `prodosfs normalize myimg.dsk myimg.po`";

    let matches = Command::new("prodosfs")
        .about("Read-only access to Apple II ProDOS 8 disk images")
        .after_long_help(long_help)
        .subcommand_required(true)
        .arg_required_else_help(true)
        .subcommand(
            Command::new("catalog")
                .arg(arg!(<image> "path to the disk image"))
                .arg(arg!([path] "directory within the volume").default_value("/"))
                .about("write a directory listing to stdout"),
        )
        .subcommand(
            Command::new("get")
                .arg(arg!(<image> "path to the disk image"))
                .arg(arg!(<path> "file within the volume"))
                .arg(
                    arg!(-t --text "convert text files to host line endings")
                        .action(ArgAction::SetTrue),
                )
                .about("write a file's bytes to stdout"),
        )
        .subcommand(
            Command::new("attrs")
                .arg(arg!(<image> "path to the disk image"))
                .arg(arg!([path] "file or directory within the volume").default_value("/"))
                .about("show the metadata of a file or directory"),
        )
        .subcommand(
            Command::new("info")
                .arg(arg!(<image> "path to the disk image"))
                .about("show a summary of the volume"),
        )
        .subcommand(
            Command::new("rename")
                .arg(arg!(<image> "path to the disk image"))
                .arg(arg!(<name> "new volume name"))
                .about("rename the volume and save the image"),
        )
        .subcommand(
            Command::new("normalize")
                .arg(arg!(<image_in> "path to the disk image"))
                .arg(arg!(<image_out> "path to write the normalized image"))
                .about("write out the image in block order with any password removed"),
        )
        .get_matches();

    match matches.subcommand() {
        Some(("catalog", cmd)) => {
            let vol = Volume::open(cmd.get_one::<String>("image").expect(RCH))?;
            print!("{}", vol.catalog(cmd.get_one::<String>("path").expect(RCH))?);
            Ok(())
        }
        Some(("get", cmd)) => {
            let vol = Volume::open(cmd.get_one::<String>("image").expect(RCH))?;
            let path = cmd.get_one::<String>("path").expect(RCH);
            if Volume::is_pseudo_file(path) {
                print!("{}", vol.read_pseudo_file(path)?);
                return Ok(());
            }
            let mut fh = vol.open_file(path)?;
            let mut dat = fh.read_to_end()?;
            if cmd.get_flag("text") && fh.file_type() == FileType::Text as u8 {
                dat = text_to_host(&dat);
            }
            std::io::stdout().write_all(&dat)?;
            Ok(())
        }
        Some(("attrs", cmd)) => {
            let vol = Volume::open(cmd.get_one::<String>("image").expect(RCH))?;
            let entry = vol.get_entry(cmd.get_one::<String>("path").expect(RCH))?;
            for (key, val) in vol.xattrs(&entry)? {
                println!("{}: {}", key, val);
            }
            Ok(())
        }
        Some(("info", cmd)) => {
            let vol = Volume::open(cmd.get_one::<String>("image").expect(RCH))?;
            println!("{}", ["/", &vol.name()].concat().bright_blue().bold());
            let used = vol.count_blocks_used()?;
            let created = vol.get_entry("/")?.create_time();
            println!("{:>16}: {}", "file count", vol.file_count());
            println!("{:>16}: {}", "total blocks", vol.total_blocks());
            println!("{:>16}: {}", "blocks used", used);
            println!("{:>16}: {}", "blocks free", vol.total_blocks() as usize - used);
            println!("{:>16}: {}", "directory blocks", vol.count_root_directory_blocks()?);
            println!(
                "{:>16}: {}",
                "created",
                match created.as_datetime() {
                    Some(dt) => dt.format("%Y/%m/%d %H:%M").to_string(),
                    None => created.to_string(),
                }
            );
            println!("{:>16}: {}", "needs normalize", vol.is_dirty());
            Ok(())
        }
        Some(("rename", cmd)) => {
            let img_path = cmd.get_one::<String>("image").expect(RCH);
            let mut vol = Volume::open(img_path)?;
            vol.rename(cmd.get_one::<String>("name").expect(RCH))?;
            vol.save(img_path)?;
            println!("volume renamed to /{}", vol.name());
            Ok(())
        }
        Some(("normalize", cmd)) => {
            let vol = Volume::open(cmd.get_one::<String>("image_in").expect(RCH))?;
            if !vol.is_dirty() {
                eprintln!("prodosfs: volume is already a normal prodos disk");
                std::process::exit(1);
            }
            vol.save(cmd.get_one::<String>("image_out").expect(RCH))?;
            println!("wrote normalized prodos disk");
            Ok(())
        }
        _ => panic!("{}", RCH),
    }
}
