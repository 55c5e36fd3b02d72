use rusqlite::Connection;
use serde_json::json;
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::time::{SystemTime, UNIX_EPOCH};

fn temp_dir(prefix: &str) -> PathBuf {
    let p = std::env::temp_dir().join(format!(
        "{}-{}",
        prefix,
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("clock")
            .as_nanos()
    ));
    std::fs::create_dir_all(&p).expect("create temp dir");
    p
}

fn spawn_sidecar() -> (Child, ChildStdin, BufReader<ChildStdout>) {
    let exe = env!("CARGO_BIN_EXE_schoold");
    let mut child = Command::new(exe)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn schoold");
    let stdin = child.stdin.take().expect("child stdin");
    let stdout = child.stdout.take().expect("child stdout");
    (child, stdin, BufReader::new(stdout))
}

fn request(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let payload = json!({
        "id": id,
        "method": method,
        "params": params,
    });
    writeln!(stdin, "{}", payload).expect("write request");
    stdin.flush().expect("flush request");

    let mut line = String::new();
    reader.read_line(&mut line).expect("read response line");
    assert!(!line.trim().is_empty(), "empty response for {}", method);
    let value: serde_json::Value = serde_json::from_str(line.trim()).expect("parse response json");
    assert_eq!(value.get("id").and_then(|v| v.as_str()), Some(id));
    value
}

fn request_ok(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let value = request(stdin, reader, id, method, params);
    assert!(
        value.get("ok").and_then(|v| v.as_bool()).unwrap_or(false),
        "{} failed: {}",
        method,
        value
    );
    value.get("result").cloned().unwrap_or_else(|| json!({}))
}

fn applied(result: &serde_json::Value) -> bool {
    result
        .get("applied")
        .and_then(|v| v.as_bool())
        .expect("applied flag")
}
fn login(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    email: &str,
    password: &str,
) -> String {
    let result = request_ok(
        stdin,
        reader,
        "login",
        "auth.login",
        json!({ "email": email, "password": password }),
    );
    assert!(applied(&result), "login failed for {}: {}", email, result);
    result["data"]["session"]
        .as_str()
        .expect("session token")
        .to_string()
}

fn create_user(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    admin: &str,
    email: &str,
    role: &str,
) {
    let result = request_ok(
        stdin,
        reader,
        "user",
        "users.create",
        json!({
            "session": admin,
            "email": email,
            "name": email,
            "role": role,
            "password": "password123"
        }),
    );
    assert!(applied(&result), "users.create failed: {}", result);
}


struct Staff {
    author: String,
    reviewer: String,
    student: String,
}

fn setup_staff(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    workspace: &Path,
) -> Staff {
    let _ = request_ok(
        stdin,
        reader,
        "open",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let _ = request_ok(
        stdin,
        reader,
        "boot",
        "setup.bootstrap",
        json!({
            "schoolCode": "north",
            "schoolName": "North <High> & Co",
            "adminEmail": "admin@north.test",
            "adminName": "Admin",
            "adminPassword": "correct horse"
        }),
    );
    let admin = login(stdin, reader, "admin@north.test", "correct horse");
    create_user(stdin, reader, &admin, "author@north.test", "teacher");
    create_user(stdin, reader, &admin, "reviewer@north.test", "teacher");
    create_user(stdin, reader, &admin, "pupil@north.test", "student");
    Staff {
        author: login(stdin, reader, "author@north.test", "password123"),
        reviewer: login(stdin, reader, "reviewer@north.test", "password123"),
        student: login(stdin, reader, "pupil@north.test", "password123"),
    }
}

fn create_question(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    session: &str,
    text: &str,
    marks: f64,
) -> i64 {
    let result = request_ok(
        stdin,
        reader,
        "q",
        "questions.create",
        json!({
            "session": session,
            "subject": "Maths",
            "questionText": text,
            "questionType": "short",
            "marks": marks
        }),
    );
    assert!(applied(&result), "questions.create failed: {}", result);
    result["data"]["questionId"].as_i64().expect("questionId")
}

fn paper_status(workspace: &Path, id: i64) -> String {
    let conn = Connection::open(workspace.join("school.sqlite3")).expect("open db");
    conn.query_row("SELECT status FROM exam_papers WHERE id = ?", [id], |r| {
        r.get(0)
    })
    .expect("paper status")
}

#[test]
fn question_review_happens_once_within_school() {
    let workspace = temp_dir("schoold-questions");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let staff = setup_staff(&mut stdin, &mut reader, &workspace);
    let q = create_question(&mut stdin, &mut reader, &staff.author, "2 + 2?", 2.0);

    let bad_type = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "questions.create",
        json!({
            "session": staff.author,
            "subject": "Maths",
            "questionText": "?",
            "questionType": "essay-ish",
            "marks": 1
        }),
    );
    assert!(!applied(&bad_type));

    let student = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "questions.review",
        json!({ "session": staff.student, "questionId": q, "decision": "approve" }),
    );
    assert!(!applied(&student));
    assert_eq!(student["redirect"], "/student/dashboard");

    let own = request_ok(
        &mut stdin,
        &mut reader,
        "2b",
        "questions.review",
        json!({ "session": staff.author, "questionId": q, "decision": "approve" }),
    );
    assert!(!applied(&own));
    assert_eq!(own["flash"]["kind"], "error");

    let approve = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "questions.review",
        json!({
            "session": staff.reviewer,
            "questionId": q,
            "decision": "approve",
            "note": "clear"
        }),
    );
    assert!(applied(&approve));
    assert_eq!(approve["redirect"], "/teacher/question-bank");

    let twice = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "questions.review",
        json!({ "session": staff.reviewer, "questionId": q, "decision": "reject" }),
    );
    assert!(!applied(&twice));
    assert_eq!(twice["flash"]["kind"], "error");

    {
        let conn = Connection::open(workspace.join("school.sqlite3")).expect("open db");
        conn.execute_batch(
            "INSERT INTO schools(id, code, name, created_at) VALUES (99, 'south', 'South', '2024-01-01T00:00:00Z');
             INSERT INTO users(id, school_id, email, name, role, password_salt, password_hash, created_at)
               VALUES (990, 99, 't@south', 'South Teacher', 'teacher', 's', 'h', '2024-01-01T00:00:00Z');
             INSERT INTO question_bank(id, school_id, owner_id, subject, question_text, question_type, marks, status, created_at)
               VALUES (900, 99, 990, 'Maths', 'Elsewhere', 'short', 1, 'pending', '2024-01-01T00:00:00Z');",
        )
        .expect("seed");
    }
    let foreign = request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "questions.review",
        json!({ "session": staff.reviewer, "questionId": 900, "decision": "approve" }),
    );
    assert!(!applied(&foreign));

    let approved = request_ok(
        &mut stdin,
        &mut reader,
        "6",
        "questions.list",
        json!({ "session": staff.author, "status": "approved" }),
    );
    let rows = approved["questions"].as_array().expect("questions");
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0]["id"].as_i64(), Some(q));
    assert_eq!(rows[0]["reviewNote"], "clear");

    let pending = request_ok(
        &mut stdin,
        &mut reader,
        "7",
        "questions.list",
        json!({ "session": staff.author, "status": "pending" }),
    );
    assert!(pending["questions"].as_array().expect("questions").is_empty());

    let bad_filter = request(
        &mut stdin,
        &mut reader,
        "8",
        "questions.list",
        json!({ "session": staff.author, "status": "cancelled" }),
    );
    assert_eq!(bad_filter["error"]["code"], "bad_params");
}

#[test]
fn paper_lifecycle_draft_to_published() {
    let workspace = temp_dir("schoold-papers");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let staff = setup_staff(&mut stdin, &mut reader, &workspace);
    let approved = create_question(
        &mut stdin,
        &mut reader,
        &staff.author,
        "Is 2 < 3 & why?",
        5.0,
    );
    let pending = create_question(&mut stdin, &mut reader, &staff.author, "Pending one", 3.0);
    let review = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "questions.review",
        json!({ "session": staff.reviewer, "questionId": approved, "decision": "approve" }),
    );
    assert!(applied(&review));

    let bad_duration = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "papers.create",
        json!({
            "session": staff.author,
            "title": "Midterm",
            "subject": "Maths",
            "className": "9A",
            "durationMinutes": 0,
            "totalMarks": 50
        }),
    );
    assert!(!applied(&bad_duration));

    let created = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "papers.create",
        json!({
            "session": staff.author,
            "title": "Midterm",
            "subject": "Maths",
            "className": "9A",
            "examDate": "2024-06-01",
            "durationMinutes": 90,
            "totalMarks": 50,
            "instructions": "Answer all questions.\n\nShow <working>."
        }),
    );
    assert!(applied(&created));
    assert_eq!(created["redirect"], "/teacher/papers");
    let paper = created["data"]["paperId"].as_i64().expect("paperId");
    assert_eq!(paper_status(&workspace, paper), "draft");

    let add_pending = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "papers.addQuestion",
        json!({ "session": staff.author, "paperId": paper, "questionId": pending }),
    );
    assert!(!applied(&add_pending));

    let add = request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "papers.addQuestion",
        json!({ "session": staff.author, "paperId": paper, "questionId": approved }),
    );
    assert!(applied(&add));
    let add_again = request_ok(
        &mut stdin,
        &mut reader,
        "6",
        "papers.addQuestion",
        json!({ "session": staff.author, "paperId": paper, "questionId": approved }),
    );
    assert!(!applied(&add_again));

    let other_add = request_ok(
        &mut stdin,
        &mut reader,
        "7",
        "papers.addQuestion",
        json!({ "session": staff.reviewer, "paperId": paper, "questionId": approved }),
    );
    assert!(!applied(&other_add));

    let detail = request_ok(
        &mut stdin,
        &mut reader,
        "8",
        "papers.get",
        json!({ "session": staff.author, "paperId": paper }),
    );
    assert_eq!(detail["allocatedMarks"], 5.0);
    assert_eq!(detail["questions"].as_array().expect("questions").len(), 1);
    assert_eq!(detail["paper"]["status"], "draft");

    let hidden = request(
        &mut stdin,
        &mut reader,
        "9",
        "papers.get",
        json!({ "session": staff.reviewer, "paperId": paper }),
    );
    assert_eq!(hidden["ok"], false);
    assert_eq!(hidden["error"]["code"], "not_found");

    let rendered = request_ok(
        &mut stdin,
        &mut reader,
        "10",
        "papers.render",
        json!({ "session": staff.author, "paperId": paper }),
    );
    let header = rendered["header"].as_str().expect("header");
    assert!(header.contains("North &lt;High&gt; &amp; Co"));
    let questions = rendered["questions"].as_str().expect("questions");
    assert!(questions.contains("Is 2 &lt; 3 &amp; why?"));
    assert!(!questions.contains("2 < 3"));
    let instructions = rendered["instructions"].as_str().expect("instructions");
    assert_eq!(instructions.matches("<li>").count(), 2);
    assert!(instructions.contains("Show &lt;working&gt;."));
    assert!(rendered["paperInfo"]
        .as_str()
        .expect("paperInfo")
        .contains("1 h 30 min"));

    let renamed = request_ok(
        &mut stdin,
        &mut reader,
        "11",
        "papers.update",
        json!({ "session": staff.author, "paperId": paper, "title": "Midterm (v2)" }),
    );
    assert!(applied(&renamed));

    let stolen_publish = request_ok(
        &mut stdin,
        &mut reader,
        "12",
        "papers.publish",
        json!({ "session": staff.reviewer, "paperId": paper }),
    );
    assert!(!applied(&stolen_publish));
    assert_eq!(paper_status(&workspace, paper), "draft");

    let publish = request_ok(
        &mut stdin,
        &mut reader,
        "13",
        "papers.publish",
        json!({ "session": staff.author, "paperId": paper }),
    );
    assert!(applied(&publish));
    let publish_again = request_ok(
        &mut stdin,
        &mut reader,
        "14",
        "papers.publish",
        json!({ "session": staff.author, "paperId": paper }),
    );
    assert!(!applied(&publish_again));
    assert_eq!(paper_status(&workspace, paper), "published");

    // Published papers are frozen.
    for (i, (method, params)) in [
        (
            "papers.update",
            json!({ "session": staff.author, "paperId": paper, "title": "Late edit" }),
        ),
        (
            "papers.removeQuestion",
            json!({ "session": staff.author, "paperId": paper, "questionId": approved }),
        ),
        (
            "papers.delete",
            json!({ "session": staff.author, "paperId": paper }),
        ),
    ]
    .into_iter()
    .enumerate()
    {
        let out = request_ok(&mut stdin, &mut reader, &format!("frozen-{i}"), method, params);
        assert!(!applied(&out), "{} should not apply: {}", method, out);
    }
    let still = request_ok(
        &mut stdin,
        &mut reader,
        "15",
        "papers.get",
        json!({ "session": staff.author, "paperId": paper }),
    );
    assert_eq!(still["paper"]["title"], "Midterm (v2)");
    assert_eq!(still["questions"].as_array().expect("questions").len(), 1);
}

#[test]
fn draft_papers_can_be_edited_and_deleted() {
    let workspace = temp_dir("schoold-papers-draft");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let staff = setup_staff(&mut stdin, &mut reader, &workspace);
    let q = create_question(&mut stdin, &mut reader, &staff.author, "Define a prime.", 4.0);
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "questions.review",
        json!({ "session": staff.reviewer, "questionId": q, "decision": "approve" }),
    );

    let created = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "papers.create",
        json!({
            "session": staff.author,
            "title": "Quiz",
            "subject": "Maths",
            "className": "9B",
            "durationMinutes": "30",
            "totalMarks": "10"
        }),
    );
    let paper = created["data"]["paperId"].as_i64().expect("paperId");

    let add = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "papers.addQuestion",
        json!({ "session": staff.author, "paperId": paper, "questionId": q, "marks": 6 }),
    );
    assert!(applied(&add));

    let remove = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "papers.removeQuestion",
        json!({ "session": staff.author, "paperId": paper, "questionId": q }),
    );
    assert!(applied(&remove));

    let re_add = request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "papers.addQuestion",
        json!({ "session": staff.author, "paperId": paper, "questionId": q }),
    );
    assert!(applied(&re_add));

    let bad_update = request_ok(
        &mut stdin,
        &mut reader,
        "6",
        "papers.update",
        json!({ "session": staff.author, "paperId": paper, "examDate": "next tuesday" }),
    );
    assert!(!applied(&bad_update));

    let foreign_delete = request_ok(
        &mut stdin,
        &mut reader,
        "7",
        "papers.delete",
        json!({ "session": staff.reviewer, "paperId": paper }),
    );
    assert!(!applied(&foreign_delete));

    let delete = request_ok(
        &mut stdin,
        &mut reader,
        "8",
        "papers.delete",
        json!({ "session": staff.author, "paperId": paper }),
    );
    assert!(applied(&delete));

    let listed = request_ok(
        &mut stdin,
        &mut reader,
        "9",
        "papers.list",
        json!({ "session": staff.author }),
    );
    assert!(listed["papers"].as_array().expect("papers").is_empty());

    let conn = Connection::open(workspace.join("school.sqlite3")).expect("open db");
    let links: i64 = conn
        .query_row("SELECT COUNT(*) FROM exam_paper_questions", [], |r| r.get(0))
        .expect("count");
    assert_eq!(links, 0);
}

#[test]
fn unparseable_numbers_are_rejected_not_ignored() {
    let workspace = temp_dir("schoold-papers-numbers");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let staff = setup_staff(&mut stdin, &mut reader, &workspace);
    let q = create_question(&mut stdin, &mut reader, &staff.author, "Define a set.", 4.0);
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "questions.review",
        json!({ "session": staff.reviewer, "questionId": q, "decision": "approve" }),
    );
    let created = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "papers.create",
        json!({
            "session": staff.author,
            "title": "Quiz",
            "subject": "Maths",
            "className": "9B",
            "durationMinutes": 30,
            "totalMarks": 10
        }),
    );
    let paper = created["data"]["paperId"].as_i64().expect("paperId");

    for (i, params) in [
        json!({ "session": staff.author, "paperId": paper, "durationMinutes": "ninety" }),
        json!({ "session": staff.author, "paperId": paper, "totalMarks": "lots" }),
        json!({ "session": staff.author, "paperId": paper, "durationMinutes": true }),
    ]
    .into_iter()
    .enumerate()
    {
        let out = request_ok(
            &mut stdin,
            &mut reader,
            &format!("update-{i}"),
            "papers.update",
            params,
        );
        assert!(!applied(&out), "{}", out);
        assert_eq!(out["flash"]["kind"], "error");
    }

    let bad_marks = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "papers.addQuestion",
        json!({ "session": staff.author, "paperId": paper, "questionId": q, "marks": "many" }),
    );
    assert!(!applied(&bad_marks));

    // Blank form fields still mean "leave unchanged".
    let blank = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "papers.update",
        json!({ "session": staff.author, "paperId": paper, "durationMinutes": "", "title": "Quiz 2" }),
    );
    assert!(applied(&blank));

    let conn = Connection::open(workspace.join("school.sqlite3")).expect("open db");
    let (duration, total, title): (i64, f64, String) = conn
        .query_row(
            "SELECT duration_minutes, total_marks, title FROM exam_papers WHERE id = ?",
            [paper],
            |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?)),
        )
        .expect("paper row");
    assert_eq!((duration, total, title.as_str()), (30, 10.0, "Quiz 2"));
    let links: i64 = conn
        .query_row("SELECT COUNT(*) FROM exam_paper_questions", [], |r| r.get(0))
        .expect("count");
    assert_eq!(links, 0);
}
