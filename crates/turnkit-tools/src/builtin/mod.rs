// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
pub mod delete_file;
pub mod edit_file;
pub mod find_file;
pub mod grep;
pub mod list_dir;
pub mod read_file;
pub mod read_image;
pub mod run_terminal_command;
pub mod switch_mode;
pub mod todo_write;
pub mod web_fetch;
pub mod web_search;
pub mod write_file;
